use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Value, json};
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;

use super::provider::{
    BoxFuture, BuildClientSnafu, Completion, CompletionTransport, ContextMessage,
    MissingEndpointSnafu, ReadBodySnafu, SendRequestSnafu, TransportConfig, TransportError,
    TransportResult,
};

pub const FLOWISE_TRANSPORT_ID: &str = "flowise";

const ACCEPT_STREAMING: &str = "text/event-stream, application/json, */*";
/// Upper bound on how much of an error body is echoed back to the user.
const STATUS_DETAIL_LIMIT: usize = 200;
const EMPTY_RESPONSE: &str = "Empty response";
/// Direct text fields a prediction endpoint may answer with, in lookup order.
const DIRECT_TEXT_FIELDS: [&str; 4] = ["text", "output", "response", "result"];

pub struct FlowiseTransport {
    config: TransportConfig,
    client: reqwest::Client,
}

impl FlowiseTransport {
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        ensure!(
            !config.endpoint.is_empty(),
            MissingEndpointSnafu {
                stage: "flowise-new",
                transport_id: config.transport_id.clone(),
            }
        );

        let client = reqwest::Client::builder()
            .build()
            .context(BuildClientSnafu {
                stage: "flowise-build-client",
            })?;

        Ok(Self { config, client })
    }

    /// Flattens the context window into the single `question` string the
    /// prediction API expects.
    pub fn render_question(context: &[ContextMessage]) -> String {
        context
            .iter()
            .map(|message| format!("{}: {}", message.role.as_str(), message.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn is_stream_like(content_type: &str) -> bool {
        content_type.contains("text/event-stream")
            || content_type.contains("application/x-ndjson")
            || content_type.starts_with("text/")
    }

    /// Reduces a non-streaming response body to displayable text.
    pub fn reduce_body_text(raw: &str) -> String {
        let mut parsed = serde_json::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));

        // Some deployments double-encode the payload.
        if let Value::String(inner) = &parsed
            && let Ok(nested) = serde_json::from_str::<Value>(inner)
        {
            parsed = nested;
        }

        let direct = DIRECT_TEXT_FIELDS
            .iter()
            .filter_map(|field| parsed.get(field))
            .chain(parsed.get("data").and_then(|data| data.get("text")))
            .filter_map(Value::as_str)
            .find(|text| !text.trim().is_empty());

        let text = match (direct, &parsed) {
            (Some(text), _) => text.to_string(),
            (None, Value::String(text)) => text.clone(),
            (None, other) => other.to_string(),
        };

        if text.is_empty() {
            EMPTY_RESPONSE.to_string()
        } else {
            text
        }
    }

    fn status_detail(body: &str) -> String {
        let excerpt = body.chars().take(STATUS_DETAIL_LIMIT).collect::<String>();
        if excerpt.is_empty() {
            String::new()
        } else {
            format!(": {excerpt}")
        }
    }

    async fn request_completion(
        &self,
        context: &[ContextMessage],
        cancel: CancellationToken,
    ) -> TransportResult<Completion> {
        let body = json!({
            "question": Self::render_question(context),
            "streaming": true,
        });

        let mut request = self
            .client
            .post(self.config.endpoint.as_str())
            .header(ACCEPT, ACCEPT_STREAMING)
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(TransportError::Aborted { stage: "flowise-send" });
            }
            response = request.send() => response.context(SendRequestSnafu {
                stage: "flowise-send",
            })?,
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                transport_id = %self.config.transport_id,
                status = status.as_u16(),
                "completion endpoint rejected the request"
            );
            return Err(TransportError::Status {
                stage: "flowise-status",
                status: status.as_u16(),
                detail: Self::status_detail(&body),
            });
        }

        if Self::is_stream_like(&content_type) {
            tracing::debug!(content_type = %content_type, "streaming response detected");
            let stream = response
                .bytes_stream()
                .map(|chunk| {
                    chunk.map_err(|source| TransportError::ReadChunk {
                        stage: "flowise-read-chunk",
                        message: source.to_string(),
                    })
                })
                .boxed();
            return Ok(Completion::stream(stream));
        }

        let raw = response.text().await.context(ReadBodySnafu {
            stage: "flowise-read-body",
        })?;
        Ok(Completion::text(Self::reduce_body_text(&raw)))
    }
}

impl CompletionTransport for FlowiseTransport {
    fn id(&self) -> &str {
        &self.config.transport_id
    }

    fn get_completion<'a>(
        &'a self,
        context: &'a [ContextMessage],
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransportResult<Completion>> {
        Box::pin(self.request_completion(context, cancel))
    }
}
