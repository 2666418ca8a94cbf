//! HTTP client for the helpdesk backend.
//!
//! Every call except [`BackendClient::health`] carries a bearer JWT minted for
//! the Telegram user on whose behalf the bot is acting. A 401 drops the cached
//! token and the request is retried once with a fresh one.

use std::time::Duration;

use reqwest::Method;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use teloxide::types::User;
use thiserror::Error;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::auth::AuthError;
use crate::auth::TokenProvider;
use crate::models::Comment;
use crate::models::Health;
use crate::models::NewComment;
use crate::models::NewTicket;
use crate::models::Profile;
use crate::models::Ticket;
use crate::models::TicketPage;
use crate::models::UserSync;
use crate::util::truncate_chars;

pub const TICKETS_PER_PAGE: u32 = 5;
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("backend request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("backend response could not be decoded: {0}")]
  Decode(reqwest::Error),
  #[error("backend rejected our credentials")]
  Unauthorized,
  #[error("resource not found")]
  NotFound,
  #[error("rate limited by backend (retry after {retry_after:?}s)")]
  RateLimited { retry_after: Option<u64> },
  #[error("backend rejected request ({status}): {message}")]
  Rejected { status: u16, message: String },
  #[error("backend unavailable ({0})")]
  Unavailable(u16),
  #[error(transparent)]
  Auth(#[from] AuthError),
  #[error("request body could not be encoded: {0}")]
  Encode(#[from] serde_json::Error),
}

impl ApiError {
  pub fn user_message(&self) -> String {
    match self {
      Self::Transport(_) | Self::Decode(_) => {
        "⚠️ The helpdesk service is unreachable right now. Please try again later.".to_string()
      },
      Self::Unauthorized => "🔒 The helpdesk refused our credentials. Please try again later.".to_string(),
      Self::NotFound => "❓ Not found.".to_string(),
      Self::RateLimited { retry_after: Some(secs) } => format!("⏳ Too many requests. Try again in {secs}s."),
      Self::RateLimited { retry_after: None } => "⏳ Too many requests. Try again shortly.".to_string(),
      Self::Rejected { message, .. } => format!("⚠️ {message}"),
      Self::Unavailable(_) => "🛠 The helpdesk service is temporarily unavailable.".to_string(),
      Self::Auth(_) | Self::Encode(_) => "⚠️ Internal error, please try again.".to_string(),
    }
  }
}

/// The Telegram user a backend call is made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
  pub id: i64,
  pub username: Option<String>,
}

impl Caller {
  pub fn from_user(user: &User) -> Self {
    Self {
      id: user.id.0 as i64,
      username: user.username.clone(),
    }
  }
}

#[derive(Deserialize)]
struct ErrorBody {
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  error: Option<String>,
}

#[derive(Clone)]
pub struct BackendClient {
  http: reqwest::Client,
  base_url: Url,
  tokens: TokenProvider,
}

impl BackendClient {
  pub fn new(base_url: Url, timeout: Duration, tokens: TokenProvider) -> Result<Self, ApiError> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self {
      http,
      base_url,
      tokens,
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
  }

  #[instrument(skip(self, sync), fields(telegram_id = sync.telegram_id))]
  pub async fn sync_user(&self, caller: &Caller, sync: &UserSync) -> Result<Profile, ApiError> {
    let body = serde_json::to_value(sync)?;
    self
      .send(caller, Method::POST, "/api/v1/users/sync", &[], Some(body))
      .await
  }

  #[instrument(skip(self))]
  pub async fn profile(&self, caller: &Caller) -> Result<Profile, ApiError> {
    self.send(caller, Method::GET, "/api/v1/users/me", &[], None).await
  }

  #[instrument(skip(self))]
  pub async fn list_tickets(&self, caller: &Caller, page: u32) -> Result<TicketPage, ApiError> {
    let query = [
      ("page", page.max(1).to_string()),
      ("per_page", TICKETS_PER_PAGE.to_string()),
    ];
    self.send(caller, Method::GET, "/api/v1/tickets", &query, None).await
  }

  #[instrument(skip(self))]
  pub async fn get_ticket(&self, caller: &Caller, ticket_id: i64) -> Result<Ticket, ApiError> {
    let path = format!("/api/v1/tickets/{ticket_id}");
    self.send(caller, Method::GET, &path, &[], None).await
  }

  #[instrument(skip(self, ticket))]
  pub async fn create_ticket(&self, caller: &Caller, ticket: &NewTicket) -> Result<Ticket, ApiError> {
    let body = serde_json::to_value(ticket)?;
    self
      .send(caller, Method::POST, "/api/v1/tickets", &[], Some(body))
      .await
  }

  #[instrument(skip(self, comment))]
  pub async fn add_comment(&self, caller: &Caller, ticket_id: i64, comment: &NewComment) -> Result<Comment, ApiError> {
    let path = format!("/api/v1/tickets/{ticket_id}/comments");
    let body = serde_json::to_value(comment)?;
    self.send(caller, Method::POST, &path, &[], Some(body)).await
  }

  #[instrument(skip(self))]
  pub async fn close_ticket(&self, caller: &Caller, ticket_id: i64) -> Result<Ticket, ApiError> {
    let path = format!("/api/v1/tickets/{ticket_id}/close");
    self.send(caller, Method::POST, &path, &[], None).await
  }

  #[instrument(skip(self))]
  pub async fn health(&self) -> Result<Health, ApiError> {
    let response = self.http.get(self.url("/api/v1/health")).send().await?;
    decode(response).await
  }

  async fn send<T: DeserializeOwned>(
    &self,
    caller: &Caller,
    method: Method,
    path: &str,
    query: &[(&str, String)],
    body: Option<Value>,
  ) -> Result<T, ApiError> {
    let response = self.send_once(caller, method.clone(), path, query, body.as_ref()).await?;
    if response.status() != StatusCode::UNAUTHORIZED {
      return decode(response).await;
    }

    warn!(user_id = caller.id, path, "backend returned 401, refreshing token");
    self.tokens.invalidate(caller.id).await?;
    let retry = self.send_once(caller, method, path, query, body.as_ref()).await?;
    decode(retry).await
  }

  async fn send_once(
    &self,
    caller: &Caller,
    method: Method,
    path: &str,
    query: &[(&str, String)],
    body: Option<&Value>,
  ) -> Result<Response, ApiError> {
    let token = self.tokens.token_for(caller.id, caller.username.as_deref()).await?;
    let mut request = self.http.request(method, self.url(path)).bearer_auth(token);
    if !query.is_empty() {
      request = request.query(query);
    }
    if let Some(body) = body {
      request = request.json(body);
    }
    let response = request.send().await?;
    debug!(user_id = caller.id, path, status = %response.status(), "backend responded");
    Ok(response)
  }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
  let status = response.status();
  if status.is_success() {
    return response.json::<T>().await.map_err(ApiError::Decode);
  }

  match status {
    StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
    StatusCode::NOT_FOUND => Err(ApiError::NotFound),
    StatusCode::TOO_MANY_REQUESTS => {
      let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
      Err(ApiError::RateLimited { retry_after })
    },
    status if status.is_server_error() => Err(ApiError::Unavailable(status.as_u16())),
    status => {
      let text = response.text().await.unwrap_or_default();
      Err(ApiError::Rejected {
        status: status.as_u16(),
        message: error_message(status, &text),
      })
    },
  }
}

fn error_message(status: StatusCode, body: &str) -> String {
  let from_json = serde_json::from_str::<ErrorBody>(body)
    .ok()
    .and_then(|parsed| parsed.message.or(parsed.error));
  let message = match from_json {
    Some(message) => message,
    None if !body.trim().is_empty() => body.trim().to_string(),
    None => status.canonical_reason().unwrap_or("request rejected").to_string(),
  };
  truncate_chars(&message, MAX_ERROR_MESSAGE_CHARS)
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::time::Duration;

  use pretty_assertions::assert_eq;
  use reqwest::StatusCode;
  use reqwest::Url;
  use serde_json::json;
  use wiremock::Mock;
  use wiremock::MockServer;
  use wiremock::ResponseTemplate;
  use wiremock::matchers::body_json;
  use wiremock::matchers::header_exists;
  use wiremock::matchers::method;
  use wiremock::matchers::path;
  use wiremock::matchers::query_param;

  use super::ApiError;
  use super::BackendClient;
  use super::Caller;
  use super::error_message;
  use crate::auth::TokenIssuer;
  use crate::auth::TokenProvider;
  use crate::config::JwtConfig;
  use crate::models::NewTicket;
  use crate::models::TicketStatus;
  use crate::session::MemorySessionStore;

  fn client_for(server: &MockServer) -> BackendClient {
    let jwt = JwtConfig {
      secret: "0123456789abcdef0123456789abcdef".to_string(),
      issuer: "tg-helpdesk-bot".to_string(),
      audience: None,
      token_ttl: Duration::from_secs(900),
      refresh_margin: Duration::from_secs(60),
    };
    let tokens = TokenProvider::new(
      TokenIssuer::new(&jwt),
      Arc::new(MemorySessionStore::new()),
      jwt.refresh_margin,
    );
    BackendClient::new(
      Url::parse(&server.uri()).unwrap(),
      Duration::from_secs(5),
      tokens,
    )
    .unwrap()
  }

  fn caller() -> Caller {
    Caller {
      id: 42,
      username: Some("alice".to_string()),
    }
  }

  fn ticket_json(id: i64, status: &str) -> serde_json::Value {
    json!({
      "id": id,
      "title": "Printer on fire",
      "body": "Smoke everywhere",
      "status": status,
      "created_at": "2025-01-01T10:00:00Z",
      "updated_at": "2025-01-01T11:00:00Z"
    })
  }

  #[tokio::test]
  async fn lists_tickets_with_bearer_and_paging() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/tickets"))
      .and(query_param("page", "2"))
      .and(query_param("per_page", "5"))
      .and(header_exists("authorization"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "items": [ticket_json(7, "open")],
        "page": 2,
        "total_pages": 3
      })))
      .expect(1)
      .mount(&server)
      .await;

    let page = client_for(&server).list_tickets(&caller(), 2).await.unwrap();
    assert_eq!(page.page, 2);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.items[0].status, TicketStatus::Open);
    assert!(page.items[0].comments.is_empty());
  }

  #[tokio::test]
  async fn creates_ticket_with_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/v1/tickets"))
      .and(body_json(json!({ "title": "Printer on fire", "body": "Smoke everywhere" })))
      .respond_with(ResponseTemplate::new(201).set_body_json(ticket_json(11, "open")))
      .expect(1)
      .mount(&server)
      .await;

    let ticket = client_for(&server)
      .create_ticket(
        &caller(),
        &NewTicket {
          title: "Printer on fire".to_string(),
          body: "Smoke everywhere".to_string(),
        },
      )
      .await
      .unwrap();
    assert_eq!(ticket.id, 11);
  }

  #[tokio::test]
  async fn retries_once_after_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/v1/tickets/3/close"))
      .respond_with(ResponseTemplate::new(401))
      .up_to_n_times(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/v1/tickets/3/close"))
      .respond_with(ResponseTemplate::new(200).set_body_json(ticket_json(3, "closed")))
      .mount(&server)
      .await;

    let ticket = client_for(&server).close_ticket(&caller(), 3).await.unwrap();
    assert!(ticket.is_closed());
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
  }

  #[tokio::test]
  async fn repeated_unauthorized_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/users/me"))
      .respond_with(ResponseTemplate::new(401))
      .expect(2)
      .mount(&server)
      .await;

    let err = client_for(&server).profile(&caller()).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
  }

  #[tokio::test]
  async fn maps_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/tickets/404"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/tickets/429"))
      .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/tickets/422"))
      .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "message": "title too long" })))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/tickets/503"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let client = client_for(&server);
    let caller = caller();
    assert!(matches!(client.get_ticket(&caller, 404).await, Err(ApiError::NotFound)));
    assert!(matches!(
      client.get_ticket(&caller, 429).await,
      Err(ApiError::RateLimited { retry_after: Some(30) })
    ));
    match client.get_ticket(&caller, 422).await {
      Err(ApiError::Rejected { status, message }) => {
        assert_eq!(status, 422);
        assert_eq!(message, "title too long");
      },
      other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(client.get_ticket(&caller, 503).await, Err(ApiError::Unavailable(503))));
  }

  #[tokio::test]
  async fn health_is_unauthenticated() {
    let server = MockServer::start().await;
    // mounted first so it wins if a bearer token is ever sent
    Mock::given(method("GET"))
      .and(path("/api/v1/health"))
      .and(header_exists("authorization"))
      .respond_with(ResponseTemplate::new(500))
      .expect(0)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/health"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok", "version": "1.4.0" })))
      .expect(1)
      .mount(&server)
      .await;

    let health = client_for(&server).health().await.unwrap();
    assert!(health.is_ok());
    assert_eq!(health.version.as_deref(), Some("1.4.0"));
  }

  #[test]
  fn error_message_prefers_json_fields() {
    assert_eq!(
      error_message(StatusCode::BAD_REQUEST, r#"{"error":"bad page"}"#),
      "bad page"
    );
    assert_eq!(error_message(StatusCode::BAD_REQUEST, "plain text"), "plain text");
    assert_eq!(error_message(StatusCode::CONFLICT, ""), "Conflict");
  }

  #[test]
  fn user_messages_mention_retry_delay() {
    let err = ApiError::RateLimited { retry_after: Some(12) };
    assert!(err.user_message().contains("12s"));
    assert_eq!(ApiError::NotFound.user_message(), "❓ Not found.");
  }
}
