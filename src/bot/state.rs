use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum ConversationState {
  #[default]
  Idle,
  NewTicket(TicketDraft),
  Reply {
    ticket_id: i64,
  },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketDraft {
  pub stage: DraftStage,
  pub author_tg_id: i64,
  pub title: Option<String>,
  pub body: Option<String>,
}

impl TicketDraft {
  pub fn new(author_tg_id: i64) -> Self {
    Self {
      stage: DraftStage::Title,
      author_tg_id,
      title: None,
      body: None,
    }
  }

  /// Only the user who started a draft may advance or submit it.
  pub fn is_author(&self, user_id: i64) -> bool {
    self.author_tg_id == user_id
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DraftStage {
  Title,
  Body,
  Confirm,
}

/// What is persisted per chat in the session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
  pub state: ConversationState,
  pub updated_at: DateTime<Utc>,
}

impl Session {
  pub fn new(state: ConversationState) -> Self {
    Self {
      state,
      updated_at: Utc::now(),
    }
  }
}
