use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
  pub id: i64,
  pub telegram_id: i64,
  pub display_name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub open_tickets: u32,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
  Open,
  Pending,
  Closed,
}

impl TicketStatus {
  pub fn label(self) -> &'static str {
    match self {
      Self::Open => "🟢 open",
      Self::Pending => "🟡 pending",
      Self::Closed => "⚪ closed",
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
  pub id: i64,
  pub author: String,
  pub body: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
  pub id: i64,
  pub title: String,
  pub body: String,
  pub status: TicketStatus,
  #[serde(default)]
  pub comments: Vec<Comment>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Ticket {
  pub fn is_closed(&self) -> bool {
    self.status == TicketStatus::Closed
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketPage {
  pub items: Vec<Ticket>,
  pub page: u32,
  pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewTicket {
  pub title: String,
  pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
  pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSync {
  pub telegram_id: i64,
  pub username: Option<String>,
  pub first_name: String,
  pub last_name: Option<String>,
  pub language_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Health {
  pub status: String,
  #[serde(default)]
  pub version: Option<String>,
}

impl Health {
  pub fn is_ok(&self) -> bool {
    self.status.eq_ignore_ascii_case("ok")
  }
}
