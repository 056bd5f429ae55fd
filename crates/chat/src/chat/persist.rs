use std::sync::Arc;

use trickle_llm::{BoxFuture, Role};
use trickle_storage::{ChatId, MessageId, MessageRecord, MessageStore, NewMessage, StorageResult};

use super::message::storage_role;

/// Result of a save attempt. Failures are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved { id: MessageId },
    Rejected { error: String },
}

/// Saves and loads the messages of one chat.
pub trait Persister: Send + Sync {
    fn persist_message<'a>(
        &'a self,
        role: Role,
        content: &'a str,
        title_hint: Option<&'a str>,
    ) -> BoxFuture<'a, PersistOutcome>;

    fn load_messages(&self) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>>;
}

/// [`Persister`] over a [`MessageStore`], bound to one chat.
pub struct StorePersister {
    store: Arc<dyn MessageStore>,
    chat_id: ChatId,
}

impl StorePersister {
    pub fn new(store: Arc<dyn MessageStore>, chat_id: ChatId) -> Self {
        Self { store, chat_id }
    }

    async fn save(&self, role: Role, content: &str, title_hint: Option<&str>) -> PersistOutcome {
        let mut input = NewMessage::new(storage_role(role), content);
        if let Some(hint) = title_hint {
            input = input.with_title_hint(hint);
        }

        match self.store.append_message(self.chat_id, input).await {
            Ok(record) => {
                tracing::debug!(
                    chat_id = %self.chat_id,
                    message_id = %record.id,
                    seq = record.seq,
                    role = role.as_str(),
                    "message persisted"
                );
                PersistOutcome::Saved { id: record.id }
            }
            Err(error) => {
                tracing::warn!(
                    chat_id = %self.chat_id,
                    role = role.as_str(),
                    rejected = error.is_rejection(),
                    error = %error,
                    "failed to persist message"
                );
                PersistOutcome::Rejected {
                    error: error.to_string(),
                }
            }
        }
    }
}

impl Persister for StorePersister {
    fn persist_message<'a>(
        &'a self,
        role: Role,
        content: &'a str,
        title_hint: Option<&'a str>,
    ) -> BoxFuture<'a, PersistOutcome> {
        Box::pin(self.save(role, content, title_hint))
    }

    fn load_messages(&self) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>> {
        self.store.list_messages(self.chat_id)
    }
}
