use std::time::SystemTime;

use trickle_llm::{ContextMessage, Role};
use trickle_storage::{ChatId, MessageId, MessageRecord, MessageRole};
use uuid::Uuid;

/// Client-side message identifier, `<role>-<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalMessageId(String);

impl LocalMessageId {
    pub fn generate(role: Role) -> Self {
        Self(format!("{}-{}", role.as_str(), Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocalMessageId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Identifier for one request/stream cycle.
///
/// Every send and retry gets a fresh one so a late terminal transition from an
/// older turn is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl TurnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Persistence status of one message. Moves only out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTransitionRejection {
    AlreadySettled {
        current: MessageStatus,
        attempted: MessageStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: LocalMessageId,
    pub chat_id: ChatId,
    pub role: Role,
    pub content: String,
    pub created_at: SystemTime,
    /// Position in the transcript, assigned when the message is appended.
    pub seq: u64,
    pub server_id: Option<MessageId>,
    pub status: MessageStatus,
}

impl Message {
    pub fn new(chat_id: ChatId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: LocalMessageId::generate(role),
            chat_id,
            role,
            content: content.into(),
            created_at: SystemTime::now(),
            seq: 0,
            server_id: None,
            status: MessageStatus::Pending,
        }
    }

    /// Creates the empty assistant message a turn streams into.
    pub fn assistant_placeholder(chat_id: ChatId) -> Self {
        Self::new(chat_id, Role::Assistant, String::new())
    }

    /// Rebuilds a transcript entry from a stored row.
    pub fn from_record(record: &MessageRecord) -> Self {
        let role = match record.role {
            MessageRole::User => Role::User,
            MessageRole::Assistant => Role::Assistant,
        };
        Self {
            id: LocalMessageId::generate(role),
            chat_id: record.chat_id,
            role,
            content: record.content.clone(),
            created_at: SystemTime::UNIX_EPOCH
                + std::time::Duration::from_secs(record.created_at_unix_seconds),
            seq: record.seq,
            server_id: Some(record.id),
            status: MessageStatus::Sent,
        }
    }

    pub fn mark_sent(&mut self, server_id: MessageId) -> Result<(), StatusTransitionRejection> {
        self.settle(MessageStatus::Sent)?;
        self.server_id = Some(server_id);
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<(), StatusTransitionRejection> {
        self.settle(MessageStatus::Failed)
    }

    fn settle(&mut self, next: MessageStatus) -> Result<(), StatusTransitionRejection> {
        match self.status {
            MessageStatus::Pending => {
                self.status = next;
                Ok(())
            }
            current => Err(StatusTransitionRejection::AlreadySettled {
                current,
                attempted: next,
            }),
        }
    }

    pub fn to_context(&self) -> ContextMessage {
        ContextMessage::new(self.role, self.content.clone())
    }
}

pub fn storage_role(role: Role) -> MessageRole {
    match role {
        Role::User => MessageRole::User,
        Role::Assistant => MessageRole::Assistant,
    }
}

/// Which part of a turn an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Generation,
    Save,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatErrorState {
    pub kind: ErrorKind,
    pub message: String,
}

/// UI-facing flags for the chat as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Indicators {
    pub loading: bool,
    pub composing: bool,
    pub error: Option<ChatErrorState>,
}

/// Ordered transcript plus the lifecycle of the active turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub chat_id: ChatId,
    pub messages: Vec<Message>,
    pub indicators: Indicators,
    pub turn_state: TurnState,
    next_seq: u64,
}

impl Conversation {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            messages: Vec::new(),
            indicators: Indicators::default(),
            turn_state: TurnState::Idle,
            next_seq: 1,
        }
    }

    /// Appends `message` at the end of the transcript, assigning its `seq`.
    pub fn push(&mut self, mut message: Message) -> &Message {
        message.seq = self.next_seq;
        self.next_seq += 1;
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Replaces the transcript with stored history, ordered by `seq`.
    pub fn replace_history(&mut self, records: &[MessageRecord]) {
        self.messages = records.iter().map(Message::from_record).collect();
        self.messages.sort_by_key(|message| message.seq);
        self.next_seq = self.messages.last().map_or(1, |message| message.seq + 1);
    }

    pub fn message(&self, id: &LocalMessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn message_mut(&mut self, id: &LocalMessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| &message.id == id)
    }

    /// The last `window` messages that carry text, oldest first.
    pub fn context_window(&self, window: usize) -> Vec<Message> {
        let with_text = self
            .messages
            .iter()
            .filter(|message| !message.content.trim().is_empty())
            .collect::<Vec<_>>();
        let skip = with_text.len().saturating_sub(window);
        with_text.into_iter().skip(skip).cloned().collect()
    }

    pub fn apply_turn_transition(&mut self, transition: TurnTransition) -> TurnTransitionResult {
        let next_state = self.turn_state.apply(transition)?;
        self.turn_state = next_state.clone();
        Ok(next_state)
    }
}

/// Lifecycle of a single turn: idle, requesting, streaming, then one of the
/// three terminal states.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Requesting(TurnId),
    Streaming(TurnId),
    Completed(TurnId),
    Errored {
        turn: TurnId,
        message: String,
    },
    Cancelled(TurnId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransition {
    Start(TurnId),
    StreamOpened(TurnId),
    Complete(TurnId),
    Fail { turn: TurnId, message: String },
    Cancel(TurnId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransitionRejection {
    AlreadyActive { active: TurnId, attempted: TurnId },
    NoActiveTurn,
    NotRequesting { attempted: TurnId },
    TurnMismatch { active: TurnId, attempted: TurnId },
}

pub type TurnTransitionResult = Result<TurnState, TurnTransitionRejection>;

impl TurnState {
    /// Returns the active turn while requesting or streaming.
    pub fn active_turn(&self) -> Option<TurnId> {
        match self {
            Self::Requesting(turn) | Self::Streaming(turn) => Some(*turn),
            Self::Idle | Self::Completed(_) | Self::Errored { .. } | Self::Cancelled(_) => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_turn().is_some()
    }

    /// Applies one transition deterministically.
    ///
    /// A new turn may start from any inactive state. Terminal transitions
    /// must name the active turn; completion additionally requires an open
    /// stream, while failure and cancellation may end a turn that is still
    /// requesting.
    pub fn apply(&self, transition: TurnTransition) -> TurnTransitionResult {
        match transition {
            TurnTransition::Start(turn) => self.apply_start(turn),
            TurnTransition::StreamOpened(turn) => self.apply_stream_opened(turn),
            TurnTransition::Complete(turn) => match self {
                Self::Streaming(active) if *active == turn => Ok(Self::Completed(turn)),
                _ => Err(self.reject_terminal(turn)),
            },
            TurnTransition::Fail { turn, message } => match self.active_turn() {
                Some(active) if active == turn => Ok(Self::Errored { turn, message }),
                _ => Err(self.reject_terminal(turn)),
            },
            TurnTransition::Cancel(turn) => match self.active_turn() {
                Some(active) if active == turn => Ok(Self::Cancelled(turn)),
                _ => Err(self.reject_terminal(turn)),
            },
        }
    }

    fn apply_start(&self, turn: TurnId) -> TurnTransitionResult {
        match self.active_turn() {
            Some(active) if active == turn => Ok(self.clone()),
            Some(active) => Err(TurnTransitionRejection::AlreadyActive {
                active,
                attempted: turn,
            }),
            None => Ok(Self::Requesting(turn)),
        }
    }

    fn apply_stream_opened(&self, turn: TurnId) -> TurnTransitionResult {
        match self {
            Self::Requesting(active) if *active == turn => Ok(Self::Streaming(turn)),
            Self::Requesting(active) | Self::Streaming(active) if *active != turn => {
                Err(TurnTransitionRejection::TurnMismatch {
                    active: *active,
                    attempted: turn,
                })
            }
            _ => Err(TurnTransitionRejection::NotRequesting { attempted: turn }),
        }
    }

    fn reject_terminal(&self, turn: TurnId) -> TurnTransitionRejection {
        match self.active_turn() {
            Some(active) if active != turn => TurnTransitionRejection::TurnMismatch {
                active,
                attempted: turn,
            },
            Some(_) => TurnTransitionRejection::NotRequesting { attempted: turn },
            None => TurnTransitionRejection::NoActiveTurn,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(chat_id: ChatId, seq: u64, role: MessageRole, content: &str) -> MessageRecord {
        MessageRecord {
            id: MessageId::new_v7(),
            chat_id,
            seq,
            role,
            content: content.to_string(),
            created_at_unix_seconds: 1_700_000_000 + seq,
        }
    }

    #[test]
    fn local_ids_carry_the_role() {
        assert!(LocalMessageId::generate(Role::User).as_str().starts_with("user-"));
        assert!(
            LocalMessageId::generate(Role::Assistant)
                .as_str()
                .starts_with("assistant-")
        );
    }

    #[test]
    fn status_only_leaves_pending() {
        let mut message = Message::new(ChatId::new_v7(), Role::Assistant, "hi");
        assert_eq!(message.mark_failed(), Ok(()));
        assert_eq!(
            message.mark_sent(MessageId::new_v7()),
            Err(StatusTransitionRejection::AlreadySettled {
                current: MessageStatus::Failed,
                attempted: MessageStatus::Sent,
            })
        );
        assert_eq!(message.server_id, None);
    }

    #[test]
    fn pushed_messages_get_increasing_seq() {
        let chat_id = ChatId::new_v7();
        let mut conversation = Conversation::new(chat_id);
        conversation.replace_history(&[
            record(chat_id, 2, MessageRole::Assistant, "Hello!"),
            record(chat_id, 1, MessageRole::User, "Hi"),
        ]);
        assert_eq!(conversation.messages[0].content, "Hi");

        let seq = conversation.push(Message::new(chat_id, Role::User, "Next")).seq;
        assert_eq!(seq, 3);
    }

    #[test]
    fn context_window_keeps_latest_messages_with_text() {
        let chat_id = ChatId::new_v7();
        let mut conversation = Conversation::new(chat_id);
        for index in 0..5 {
            conversation.push(Message::new(chat_id, Role::User, format!("m{index}")));
        }
        conversation.push(Message::assistant_placeholder(chat_id));

        let window = conversation.context_window(3);
        let contents = window.iter().map(|m| m.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn turn_lifecycle_reaches_completed() {
        let turn = TurnId::new(1);
        let mut state = TurnState::Idle;
        for transition in [TurnTransition::Start(turn), TurnTransition::StreamOpened(turn)] {
            state = state.apply(transition).unwrap_or_else(|r| panic!("{r:?}"));
        }
        assert_eq!(state, TurnState::Streaming(turn));
        assert_eq!(
            state.apply(TurnTransition::Complete(turn)),
            Ok(TurnState::Completed(turn))
        );
    }

    #[test]
    fn completion_requires_an_open_stream() {
        let turn = TurnId::new(1);
        let requesting = TurnState::Requesting(turn);
        assert_eq!(
            requesting.apply(TurnTransition::Complete(turn)),
            Err(TurnTransitionRejection::NotRequesting { attempted: turn })
        );
        assert_eq!(
            requesting.apply(TurnTransition::Cancel(turn)),
            Ok(TurnState::Cancelled(turn))
        );
    }

    #[test]
    fn stale_turns_are_rejected() {
        let active = TurnId::new(2);
        let stale = TurnId::new(1);
        let state = TurnState::Streaming(active);

        assert_eq!(
            state.apply(TurnTransition::Start(stale)),
            Err(TurnTransitionRejection::AlreadyActive {
                active,
                attempted: stale
            })
        );
        assert_eq!(
            state.apply(TurnTransition::Fail {
                turn: stale,
                message: "late".to_string()
            }),
            Err(TurnTransitionRejection::TurnMismatch {
                active,
                attempted: stale
            })
        );
        assert_eq!(
            TurnState::Completed(active).apply(TurnTransition::Cancel(active)),
            Err(TurnTransitionRejection::NoActiveTurn)
        );
    }
}
