use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::BoxStream;
use snafu::Snafu;
use tokio_util::sync::CancellationToken;

/// Speaker role as seen by the completion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

impl ContextMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub transport_id: String,
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl TransportConfig {
    pub fn new(
        transport_id: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            transport_id: transport_id.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            api_key: api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ByteStream = BoxStream<'static, TransportResult<Bytes>>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("no completion endpoint configured for transport '{transport_id}'"))]
    MissingEndpoint {
        stage: &'static str,
        transport_id: String,
    },
    #[snafu(display("transport '{transport_id}' is not supported"))]
    UnsupportedTransport {
        stage: &'static str,
        transport_id: String,
    },
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("network error contacting completion endpoint: {source}"))]
    SendRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("completion endpoint error {status}{detail}"))]
    Status {
        stage: &'static str,
        status: u16,
        detail: String,
    },
    #[snafu(display("failed to read completion body on `{stage}`: {source}"))]
    ReadBody {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("completion stream failed: {message}"))]
    ReadChunk {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("completion request was aborted"))]
    Aborted { stage: &'static str },
}

/// What the backend handed back for one turn.
///
/// A transport reports failure by returning an error or a completion with
/// neither field set; callers must treat both the same way.
pub struct Completion {
    pub stream: Option<ByteStream>,
    pub text: Option<String>,
}

impl Completion {
    pub fn stream(stream: ByteStream) -> Self {
        Self {
            stream: Some(stream),
            text: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            stream: None,
            text: Some(text.into()),
        }
    }

    pub fn empty() -> Self {
        Self {
            stream: None,
            text: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_none() && self.text.is_none()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Completion")
            .field("stream", &self.stream.as_ref().map(|_| "<byte stream>"))
            .field("text", &self.text)
            .finish()
    }
}

pub trait CompletionTransport: Send + Sync {
    fn id(&self) -> &str;

    /// Requests a completion for `context`.
    ///
    /// Dropping the returned stream releases the underlying connection, and
    /// `cancel` aborts a request that has not produced a response yet.
    fn get_completion<'a>(
        &'a self,
        context: &'a [ContextMessage],
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransportResult<Completion>>;
}
