use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use tracing::warn;

use crate::session::SessionStore;
use crate::session::rate_key;

const WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window limiter keyed per user. A limit of zero disables it.
#[derive(Clone)]
pub struct RateLimiter {
  store: Arc<dyn SessionStore>,
  limit: u32,
  window: Duration,
}

impl RateLimiter {
  pub fn per_minute(store: Arc<dyn SessionStore>, limit: u32) -> Self {
    Self {
      store,
      limit,
      window: WINDOW,
    }
  }

  /// Counts the update and reports whether it may proceed.
  pub async fn check(&self, user_id: i64) -> bool {
    self.check_at(user_id, Utc::now().timestamp()).await
  }

  async fn check_at(&self, user_id: i64, unix_secs: i64) -> bool {
    if self.limit == 0 {
      return true;
    }

    let window_secs = self.window.as_secs().max(1) as i64;
    let window = unix_secs / window_secs;
    let key = rate_key(user_id, window);
    match self.store.incr(&key, self.window).await {
      Ok(count) if count > u64::from(self.limit) => {
        debug!(user_id, count, limit = self.limit, "rate limit exceeded");
        false
      },
      Ok(_) => true,
      Err(err) => {
        // fail open
        warn!(error = %err, user_id, "rate limiter store error");
        true
      },
    }
  }
}
