//! teloxide dialogue storage backed by the session store.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use teloxide::dispatching::dialogue::Storage;
use teloxide::types::ChatId;
use tracing::warn;

use crate::bot::state::ConversationState;
use crate::bot::state::Session;
use crate::session::SessionError;
use crate::session::SessionStore;
use crate::session::session_key;

pub struct DialogueStore {
  store: Arc<dyn SessionStore>,
  ttl: Duration,
}

impl DialogueStore {
  pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Arc<Self> {
    Arc::new(Self { store, ttl })
  }
}

impl Storage<ConversationState> for DialogueStore {
  type Error = SessionError;

  fn remove_dialogue(self: Arc<Self>, chat_id: ChatId) -> BoxFuture<'static, Result<(), Self::Error>> {
    Box::pin(async move { self.store.delete(&session_key(chat_id.0)).await })
  }

  fn update_dialogue(
    self: Arc<Self>,
    chat_id: ChatId,
    dialogue: ConversationState,
  ) -> BoxFuture<'static, Result<(), Self::Error>> {
    Box::pin(async move {
      let payload = serde_json::to_string(&Session::new(dialogue))?;
      self.store.set(&session_key(chat_id.0), &payload, self.ttl).await
    })
  }

  fn get_dialogue(self: Arc<Self>, chat_id: ChatId) -> BoxFuture<'static, Result<Option<ConversationState>, Self::Error>> {
    Box::pin(async move {
      let key = session_key(chat_id.0);
      let Some(raw) = self.store.get(&key).await? else {
        return Ok(None);
      };
      match serde_json::from_str::<Session>(&raw) {
        Ok(session) => Ok(Some(session.state)),
        Err(err) => {
          warn!(chat_id = chat_id.0, error = %err, "discarding unreadable session");
          self.store.delete(&key).await?;
          Ok(None)
        },
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::time::Duration;

  use teloxide::dispatching::dialogue::Storage;
  use teloxide::types::ChatId;

  use super::DialogueStore;
  use crate::bot::state::ConversationState;
  use crate::bot::state::TicketDraft;
  use crate::session::MemorySessionStore;
  use crate::session::SessionStore;
  use crate::session::session_key;

  #[tokio::test]
  async fn stores_and_reads_back_state() {
    let storage = DialogueStore::new(Arc::new(MemorySessionStore::new()), Duration::from_secs(60));
    let state = ConversationState::NewTicket(TicketDraft::new(3));
    storage.clone().update_dialogue(ChatId(3), state.clone()).await.unwrap();
    assert_eq!(storage.clone().get_dialogue(ChatId(3)).await.unwrap(), Some(state));
    assert_eq!(storage.get_dialogue(ChatId(4)).await.unwrap(), None);
  }

  #[tokio::test]
  async fn removing_resets_and_tolerates_missing_session() {
    let storage = DialogueStore::new(Arc::new(MemorySessionStore::new()), Duration::from_secs(60));
    storage
      .clone()
      .update_dialogue(ChatId(1), ConversationState::Reply { ticket_id: 9 })
      .await
      .unwrap();
    storage.clone().remove_dialogue(ChatId(1)).await.unwrap();
    storage.clone().remove_dialogue(ChatId(1)).await.unwrap();
    assert_eq!(storage.get_dialogue(ChatId(1)).await.unwrap(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn sessions_expire_with_ttl() {
    let storage = DialogueStore::new(Arc::new(MemorySessionStore::new()), Duration::from_secs(30));
    storage
      .clone()
      .update_dialogue(ChatId(1), ConversationState::Reply { ticket_id: 9 })
      .await
      .unwrap();
    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(storage.get_dialogue(ChatId(1)).await.unwrap(), None);
  }

  #[tokio::test]
  async fn unreadable_session_is_discarded() {
    let store = Arc::new(MemorySessionStore::new());
    store
      .set(&session_key(5), "{\"state\":42}", Duration::from_secs(60))
      .await
      .unwrap();
    let storage = DialogueStore::new(store.clone(), Duration::from_secs(60));
    assert_eq!(storage.get_dialogue(ChatId(5)).await.unwrap(), None);
    assert_eq!(store.get(&session_key(5)).await.unwrap(), None);
  }
}
