use std::collections::HashSet;

use crate::api::BackendClient;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppContext {
  api: BackendClient,
  limiter: RateLimiter,
  admins: HashSet<i64>,
}

impl AppContext {
  pub fn new(api: BackendClient, limiter: RateLimiter, admins: Vec<i64>) -> Self {
    Self {
      api,
      limiter,
      admins: admins.into_iter().collect(),
    }
  }

  pub fn api(&self) -> &BackendClient {
    &self.api
  }

  pub fn limiter(&self) -> &RateLimiter {
    &self.limiter
  }

  pub fn is_admin(&self, tg_id: i64) -> bool {
    self.admins.contains(&tg_id)
  }
}
