use snafu::Snafu;
use trickle_llm::TransportError;
use trickle_storage::StorageError;

/// Why a turn ended without a saved reply. Cancellation is not an error; it
/// is reported through `TurnOutcome::Cancelled`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TurnError {
    #[snafu(display("{source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("No response from assistant."))]
    EmptyCompletion { stage: &'static str },
    #[snafu(display("Assistant returned an empty reply."))]
    EmptyReply { stage: &'static str },
    #[snafu(display("Streaming failed: {source}"))]
    StreamRead {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("Failed to save message: {message}"))]
    Persistence {
        stage: &'static str,
        message: String,
    },
}

impl TurnError {
    /// True when the reply was generated and shown but could not be stored.
    pub fn is_save_error(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("failed to load chat history on `{stage}`: {source}"))]
    LoadHistory {
        stage: &'static str,
        source: StorageError,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
