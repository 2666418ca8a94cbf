mod api;
mod app;
mod auth;
mod bot;
mod config;
mod models;
mod rate_limit;
mod session;
mod telemetry;
mod util;

use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::Bot;
use tracing::info;
use tracing::warn;

use crate::api::BackendClient;
use crate::auth::TokenIssuer;
use crate::auth::TokenProvider;
use crate::bot::AppContext;
use crate::bot::storage::DialogueStore;
use crate::rate_limit::RateLimiter;
use crate::session::MemorySessionStore;
use crate::session::RedisSessionStore;
use crate::session::SessionStore;

#[tokio::main]
async fn main() -> Result<()> {
  let dotenv = dotenvy::dotenv();
  telemetry::init()?;
  if let Err(err) = dotenv
    && !err.not_found()
  {
    warn!(error = %err, "failed to load .env file");
  }

  let config = config::Config::from_env()?;
  info!(
    admin_count = config.admins.len(),
    backend = %config.backend_url,
    rate_limit = config.rate_limit_per_minute,
    "starting bot"
  );

  let store: Arc<dyn SessionStore> = match config.redis_url.as_deref() {
    Some(url) => Arc::new(RedisSessionStore::connect(url).await?),
    None => {
      warn!("REDIS_URL is not set, sessions are kept in memory and lost on restart");
      Arc::new(MemorySessionStore::new())
    },
  };

  let tokens = TokenProvider::new(TokenIssuer::new(&config.jwt), store.clone(), config.jwt.refresh_margin);
  let api = BackendClient::new(config.backend_url.clone(), config.http_timeout, tokens)?;
  let limiter = RateLimiter::per_minute(store.clone(), config.rate_limit_per_minute);
  let context = AppContext::new(api, limiter, config.admins);
  let storage = DialogueStore::new(store, config.session_ttl);

  let bot = Bot::new(config.bot_token);
  let app = app::App::new(bot, context, storage);
  app.run().await
}
