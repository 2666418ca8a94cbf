use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use reqwest::Url;

const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct Config {
  pub bot_token: String,
  pub backend_url: Url,
  pub redis_url: Option<String>,
  pub jwt: JwtConfig,
  pub session_ttl: Duration,
  pub rate_limit_per_minute: u32,
  pub http_timeout: Duration,
  pub admins: Vec<i64>,
}

#[derive(Clone)]
pub struct JwtConfig {
  pub secret: String,
  pub issuer: String,
  pub audience: Option<String>,
  pub token_ttl: Duration,
  pub refresh_margin: Duration,
}

impl std::fmt::Debug for JwtConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("JwtConfig")
      .field("secret", &"<redacted>")
      .field("issuer", &self.issuer)
      .field("audience", &self.audience)
      .field("token_ttl", &self.token_ttl)
      .field("refresh_margin", &self.refresh_margin)
      .finish()
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    let bot_token = env::var("BOT_TOKEN")
      .or_else(|_| env::var("TELOXIDE_TOKEN"))
      .context("BOT_TOKEN or TELOXIDE_TOKEN must be set")?;
    let backend_raw = env::var("BACKEND_URL").context("BACKEND_URL must be set")?;
    let backend_url = Url::parse(&backend_raw).with_context(|| format!("BACKEND_URL is not a valid url: {backend_raw}"))?;
    let redis_url = optional_var("REDIS_URL");

    let secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    validate_secret(&secret)?;
    let token_ttl = Duration::from_secs(parse_var("TOKEN_TTL_SECS", 900u64)?);
    let refresh_margin = Duration::from_secs(parse_var("TOKEN_REFRESH_MARGIN_SECS", 60u64)?);
    if refresh_margin >= token_ttl {
      bail!("TOKEN_REFRESH_MARGIN_SECS must be smaller than TOKEN_TTL_SECS");
    }
    let jwt = JwtConfig {
      secret,
      issuer: optional_var("JWT_ISSUER").unwrap_or_else(|| "tg-helpdesk-bot".to_string()),
      audience: optional_var("JWT_AUDIENCE"),
      token_ttl,
      refresh_margin,
    };

    let admins_raw = env::var("ADMIN_IDS").unwrap_or_default();
    let admins = parse_admins(&admins_raw);
    Ok(Self {
      bot_token,
      backend_url,
      redis_url,
      jwt,
      session_ttl: Duration::from_secs(parse_var("SESSION_TTL_SECS", 1800u64)?),
      rate_limit_per_minute: parse_var("RATE_LIMIT_PER_MINUTE", 30u32)?,
      http_timeout: Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", 10u64)?),
      admins,
    })
  }
}

fn optional_var(name: &str) -> Option<String> {
  env::var(name).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  parse_value(name, optional_var(name).as_deref(), default)
}

fn parse_value<T>(name: &str, raw: Option<&str>, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match raw {
    None => Ok(default),
    Some(raw) => raw
      .parse::<T>()
      .map_err(|err| anyhow::anyhow!("{name} has invalid value '{raw}': {err}")),
  }
}

fn validate_secret(secret: &str) -> Result<()> {
  if secret.len() < MIN_JWT_SECRET_LEN {
    bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes long");
  }
  Ok(())
}

fn parse_admins(raw: &str) -> Vec<i64> {
  raw
    .split(',')
    .filter_map(|id| {
      let trimmed = id.trim();
      if trimmed.is_empty() {
        return None;
      }
      match trimmed.parse::<i64>() {
        Ok(value) => Some(value),
        Err(err) => {
          tracing::warn!(value = trimmed, error = %err, "invalid ADMIN_IDS entry");
          None
        },
      }
    })
    .collect()
}
