//! Signed tokens the bot presents to the backend.
//!
//! Tokens are HS256 JWTs whose `sub` is the Telegram user id. [`TokenProvider`]
//! caches one token per user in the session store, expiring the cache entry
//! `refresh_margin` before the token itself so callers never receive a token
//! that is about to lapse.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use jsonwebtoken::Validation;
use jsonwebtoken::errors::ErrorKind;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::config::JwtConfig;
use crate::session::SessionError;
use crate::session::SessionStore;
use crate::session::token_key;

#[derive(Debug, Error)]
pub enum AuthError {
  #[error("token expired")]
  Expired,
  #[error("invalid token signature")]
  InvalidSignature,
  #[error("malformed token: {0}")]
  Malformed(String),
  #[error("token encoding failed: {0}")]
  Encoding(jsonwebtoken::errors::Error),
  #[error(transparent)]
  Session(#[from] SessionError),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
  fn from(err: jsonwebtoken::errors::Error) -> Self {
    match err.kind() {
      ErrorKind::ExpiredSignature => Self::Expired,
      ErrorKind::InvalidSignature => Self::InvalidSignature,
      _ => Self::Malformed(err.to_string()),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
  pub sub: String,
  pub iss: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub aud: Option<String>,
  pub iat: i64,
  pub exp: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
}

impl Claims {
  pub fn user_id(&self) -> Option<i64> {
    self.sub.parse().ok()
  }
}

#[derive(Debug, Clone)]
pub struct AuthToken {
  pub token: String,
  pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenIssuer {
  encoding: EncodingKey,
  decoding: DecodingKey,
  issuer: String,
  audience: Option<String>,
  lifetime: Duration,
}

impl TokenIssuer {
  pub fn new(config: &JwtConfig) -> Self {
    Self {
      encoding: EncodingKey::from_secret(config.secret.as_bytes()),
      decoding: DecodingKey::from_secret(config.secret.as_bytes()),
      issuer: config.issuer.clone(),
      audience: config.audience.clone(),
      lifetime: config.token_ttl,
    }
  }

  pub fn lifetime(&self) -> Duration {
    self.lifetime
  }

  pub fn issue(&self, user_id: i64, username: Option<&str>) -> Result<AuthToken, AuthError> {
    self.issue_at(user_id, username, Utc::now().timestamp())
  }

  fn issue_at(&self, user_id: i64, username: Option<&str>, now: i64) -> Result<AuthToken, AuthError> {
    let exp = now + self.lifetime.as_secs() as i64;
    let claims = Claims {
      sub: user_id.to_string(),
      iss: self.issuer.clone(),
      aud: self.audience.clone(),
      iat: now,
      exp,
      username: username.map(str::to_string),
    };
    let token =
      jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(AuthError::Encoding)?;
    let expires_at = Utc
      .timestamp_opt(exp, 0)
      .single()
      .ok_or_else(|| AuthError::Malformed(format!("expiry out of range: {exp}")))?;
    Ok(AuthToken { token, expires_at })
  }

  pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_issuer(&[&self.issuer]);
    match &self.audience {
      Some(audience) => validation.set_audience(&[audience]),
      None => validation.validate_aud = false,
    }
    let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)?;
    Ok(data.claims)
  }
}

/// Hands out per-user tokens, reusing cached ones while they remain valid.
#[derive(Clone)]
pub struct TokenProvider {
  issuer: TokenIssuer,
  store: Arc<dyn SessionStore>,
  refresh_margin: Duration,
}

impl TokenProvider {
  pub fn new(issuer: TokenIssuer, store: Arc<dyn SessionStore>, refresh_margin: Duration) -> Self {
    Self {
      issuer,
      store,
      refresh_margin,
    }
  }

  #[instrument(skip(self))]
  pub async fn token_for(&self, user_id: i64, username: Option<&str>) -> Result<String, AuthError> {
    let key = token_key(user_id);
    if let Some(cached) = self.store.get(&key).await? {
      match self.issuer.verify(&cached) {
        Ok(claims) if claims.user_id() == Some(user_id) => return Ok(cached),
        Ok(_) => warn!(user_id, "cached token belongs to another subject"),
        Err(err) => debug!(user_id, error = %err, "cached token rejected, issuing a new one"),
      }
    }

    let token = self.issuer.issue(user_id, username)?;
    let cache_ttl = self.issuer.lifetime().saturating_sub(self.refresh_margin);
    if !cache_ttl.is_zero() {
      self.store.set(&key, &token.token, cache_ttl).await?;
    }
    debug!(user_id, expires_at = %token.expires_at, "issued backend token");
    Ok(token.token)
  }

  pub async fn invalidate(&self, user_id: i64) -> Result<(), AuthError> {
    self.store.delete(&token_key(user_id)).await?;
    Ok(())
  }
}
