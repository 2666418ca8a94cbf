//! Ephemeral key-value state: dialogue sessions, rate counters and cached tokens.
//!
//! Production runs against Redis; [`MemorySessionStore`] keeps the same TTL
//! semantics in-process for local runs without Redis and for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::time::Instant;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum SessionError {
  #[error("session store unavailable: {0}")]
  Redis(#[from] redis::RedisError),
  #[error("session payload is not valid json: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("value at {0} is not an integer")]
  NotAnInteger(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>, SessionError>;

  async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionError>;

  /// Removing a missing key is not an error.
  async fn delete(&self, key: &str) -> Result<(), SessionError>;

  /// Increments a counter, applying `ttl` only when the key is created.
  async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, SessionError>;
}

pub fn session_key(chat_id: i64) -> String {
  format!("session:{chat_id}")
}

pub fn token_key(user_id: i64) -> String {
  format!("token:{user_id}")
}

pub fn rate_key(user_id: i64, window: i64) -> String {
  format!("ratelimit:{user_id}:{window}")
}

fn ttl_secs(ttl: Duration) -> u64 {
  ttl.as_secs().max(1)
}

#[derive(Clone)]
pub struct RedisSessionStore {
  conn: ConnectionManager,
}

impl RedisSessionStore {
  pub async fn connect(redis_url: &str) -> Result<Self, SessionError> {
    let client = redis::Client::open(redis_url)?;
    let conn = ConnectionManager::new(client).await?;
    Ok(Self { conn })
  }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
  #[instrument(skip(self))]
  async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
    let mut conn = self.conn.clone();
    let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
    Ok(value)
  }

  #[instrument(skip(self, value))]
  async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionError> {
    let mut conn = self.conn.clone();
    let _: () = redis::cmd("SET")
      .arg(key)
      .arg(value)
      .arg("EX")
      .arg(ttl_secs(ttl))
      .query_async(&mut conn)
      .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn delete(&self, key: &str) -> Result<(), SessionError> {
    let mut conn = self.conn.clone();
    let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, SessionError> {
    let mut conn = self.conn.clone();
    let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
    if count == 1 {
      let _: () = redis::cmd("EXPIRE")
        .arg(key)
        .arg(ttl_secs(ttl))
        .query_async(&mut conn)
        .await?;
    }
    Ok(count)
  }
}

struct Entry {
  value: String,
  expires_at: Instant,
}

#[derive(Default)]
pub struct MemorySessionStore {
  entries: Mutex<HashMap<String, Entry>>,
}

impl MemorySessionStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
    let mut entries = match self.entries.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    let now = Instant::now();
    entries.retain(|_, entry| entry.expires_at > now);
    f(&mut entries)
  }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
  async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
    Ok(self.with_entries(|entries| entries.get(key).map(|entry| entry.value.clone())))
  }

  async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionError> {
    let expires_at = Instant::now() + Duration::from_secs(ttl_secs(ttl));
    self.with_entries(|entries| {
      entries.insert(
        key.to_string(),
        Entry {
          value: value.to_string(),
          expires_at,
        },
      );
    });
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), SessionError> {
    self.with_entries(|entries| {
      entries.remove(key);
    });
    Ok(())
  }

  async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, SessionError> {
    let expires_at = Instant::now() + Duration::from_secs(ttl_secs(ttl));
    self.with_entries(|entries| {
      let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        value: "0".to_string(),
        expires_at,
      });
      let current = entry
        .value
        .parse::<u64>()
        .map_err(|_| SessionError::NotAnInteger(key.to_string()))?;
      let next = current + 1;
      entry.value = next.to_string();
      Ok(next)
    })
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::MemorySessionStore;
  use super::SessionError;
  use super::SessionStore;
  use super::rate_key;
  use super::session_key;

  #[tokio::test(start_paused = true)]
  async fn values_expire_after_ttl() {
    let store = MemorySessionStore::new();
    store.set("k", "v", Duration::from_secs(5)).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(store.get("k").await.unwrap(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn set_overwrites_and_renews_ttl() {
    let store = MemorySessionStore::new();
    store.set("k", "one", Duration::from_secs(5)).await.unwrap();
    tokio::time::advance(Duration::from_secs(4)).await;
    store.set("k", "two", Duration::from_secs(5)).await.unwrap();
    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
  }

  #[tokio::test]
  async fn deleting_missing_key_is_ok() {
    let store = MemorySessionStore::new();
    store.delete("absent").await.unwrap();
    store.set("k", "v", Duration::from_secs(60)).await.unwrap();
    store.delete("k").await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn incr_keeps_ttl_from_first_increment() {
    let store = MemorySessionStore::new();
    assert_eq!(store.incr("c", Duration::from_secs(10)).await.unwrap(), 1);
    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(store.incr("c", Duration::from_secs(10)).await.unwrap(), 2);
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(store.incr("c", Duration::from_secs(10)).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn incr_rejects_non_integer_values() {
    let store = MemorySessionStore::new();
    store.set("c", "abc", Duration::from_secs(10)).await.unwrap();
    let err = store.incr("c", Duration::from_secs(10)).await.unwrap_err();
    assert!(matches!(err, SessionError::NotAnInteger(key) if key == "c"));
    assert_eq!(store.get("c").await.unwrap().as_deref(), Some("abc"));
  }

  #[test]
  fn keys_are_namespaced() {
    assert_eq!(session_key(42), "session:42");
    assert_eq!(rate_key(7, 100), "ratelimit:7:100");
  }
}
