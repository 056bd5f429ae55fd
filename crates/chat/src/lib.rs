#![deny(unsafe_code)]

//! Streaming reply assembly for a chat client.
//!
//! [`stream`] turns a noisy byte stream into clean display text; [`chat`]
//! runs one assistant turn at a time over a transcript and reports every
//! change to a [`ChatObserver`].

pub mod chat;
pub mod config;
pub mod error;
pub mod stream;

pub use chat::{
    CancelHandle, Chat, ChatErrorState, ChatEvent, ChatObserver, Conversation, ErrorKind,
    Indicators, LocalMessageId, Message, MessageStatus, PersistOutcome, Persister,
    StorePersister, TurnId, TurnOutcome, TurnState,
};
pub use config::SessionConfig;
pub use error::{ChatError, ChatResult, TurnError};
