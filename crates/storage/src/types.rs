use super::ids::{ChatId, MessageId};

/// Title given to chats whose first message carries no usable hint.
pub const DEFAULT_CHAT_TITLE: &str = "New chat";
pub const TITLE_MAX_CHARS: usize = 80;
pub const MAX_MESSAGE_CHARS: usize = 5_000;

/// Storage-local message role, decoupled from the transcript and transport enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub id: ChatId,
    pub title: Option<String>,
    pub updated_at_unix_seconds: u64,
    pub deleted_at_unix_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub seq: u64,
    pub role: MessageRole,
    pub content: String,
    pub created_at_unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub title_hint: Option<String>,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            title_hint: None,
        }
    }

    pub fn with_title_hint(mut self, title_hint: impl Into<String>) -> Self {
        self.title_hint = Some(title_hint.into());
        self
    }

    /// Title to give an untitled chat when this message lands in it.
    ///
    /// User messages title the chat with their own content; other roles fall
    /// back to the hint. Only the first line survives, capped at
    /// [`TITLE_MAX_CHARS`].
    pub fn title_candidate(&self) -> String {
        let hint = self
            .title_hint
            .as_deref()
            .map(str::trim)
            .filter(|hint| !hint.is_empty())
            .unwrap_or(DEFAULT_CHAT_TITLE);
        let candidate = match self.role {
            MessageRole::User => self.content.trim(),
            MessageRole::Assistant => hint,
        };

        let title = candidate
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(TITLE_MAX_CHARS)
            .collect::<String>();
        if title.trim().is_empty() {
            DEFAULT_CHAT_TITLE.to_string()
        } else {
            title
        }
    }
}
