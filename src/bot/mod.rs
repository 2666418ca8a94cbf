pub mod callbacks;
pub mod commands;
pub mod context;
pub mod handlers;
pub mod state;
pub mod storage;
pub mod views;

pub type HandlerResult = anyhow::Result<()>;
pub type DialogueStorage = storage::DialogueStore;

pub use commands::Command;
pub use context::AppContext;
pub use handlers::build_schema;
