use snafu::Snafu;
use trickle_chat::ChatError;
use trickle_llm::TransportError;
use trickle_storage::StorageError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to open chat database on `{stage}`: {source}"))]
    OpenStorage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("invalid chat id on `{stage}`: {source}"))]
    InvalidChatId {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("{source}"))]
    CreateTransport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("{source}"))]
    LoadHistory {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("terminal i/o failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;
