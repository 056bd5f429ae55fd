/// Turn orchestration over a transcript.
pub mod controller;
/// Renderer-facing event contracts.
pub mod events;
/// Transcript entities and the deterministic turn state machine.
pub mod message;
pub mod persist;
pub mod session;

pub use controller::{CancelHandle, Chat, TurnOutcome};
pub use events::{ChatEvent, ChatObserver};
pub use message::{
    ChatErrorState, Conversation, ErrorKind, Indicators, LocalMessageId, Message, MessageStatus,
    StatusTransitionRejection, TurnId, TurnState, TurnTransition, TurnTransitionRejection,
    TurnTransitionResult,
};
pub use persist::{PersistOutcome, Persister, StorePersister};
pub use session::{StreamEnd, StreamSession};
