use std::sync::Arc;

use teloxide::dispatching::UpdateHandler;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::info;

use crate::bot;
use crate::bot::AppContext;
use crate::bot::Command;
use crate::bot::DialogueStorage;

pub struct App {
  bot: Bot,
  context: Arc<AppContext>,
  storage: Arc<DialogueStorage>,
  handler: UpdateHandler<anyhow::Error>,
}

impl App {
  pub fn new(bot: Bot, context: AppContext, storage: Arc<DialogueStorage>) -> Self {
    let handler = bot::build_schema();
    Self {
      bot,
      context: Arc::new(context),
      storage,
      handler,
    }
  }

  pub async fn run(self) -> anyhow::Result<()> {
    let me = self.bot.get_me().await?;
    info!(bot_username = me.username(), "connected to telegram");
    self.bot.set_my_commands(Command::bot_commands()).await?;

    Dispatcher::builder(self.bot.clone(), self.handler)
      .dependencies(dptree::deps![self.context.clone(), self.storage.clone(), me])
      .enable_ctrlc_handler()
      .build()
      .dispatch()
      .await;

    Ok(())
  }
}
