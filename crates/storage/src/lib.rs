use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{ChatId, MessageId};
pub use sqlite::SqliteStorage;
pub use types::{
    ChatRecord, DEFAULT_CHAT_TITLE, MAX_MESSAGE_CHARS, MessageRecord, MessageRole, NewMessage,
    TITLE_MAX_CHARS,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ChatStore: Send + Sync {
    fn get_chat(&self, chat_id: ChatId) -> BoxFuture<'_, StorageResult<Option<ChatRecord>>>;
    fn soft_delete_chat(&self, chat_id: ChatId) -> BoxFuture<'_, StorageResult<()>>;
}

pub trait MessageStore: Send + Sync {
    /// Appends a message, creating the chat on first use and titling it if it
    /// has no title yet.
    fn append_message(
        &self,
        chat_id: ChatId,
        input: NewMessage,
    ) -> BoxFuture<'_, StorageResult<MessageRecord>>;
    fn list_messages(&self, chat_id: ChatId) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>>;
}

pub trait Storage: ChatStore + MessageStore {}

impl<T> Storage for T where T: ChatStore + MessageStore {}
