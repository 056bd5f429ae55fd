use std::sync::Arc;

mod flowise;
mod provider;

pub use flowise::{FLOWISE_TRANSPORT_ID, FlowiseTransport};
pub use provider::{
    BoxFuture, ByteStream, Completion, CompletionTransport, ContextMessage, Role,
    TransportConfig, TransportError, TransportResult,
};

pub fn create_transport(
    mut config: TransportConfig,
) -> TransportResult<Arc<dyn CompletionTransport>> {
    if config.transport_id.is_empty() {
        config.transport_id = FLOWISE_TRANSPORT_ID.to_string();
    }

    match config.transport_id.as_str() {
        FLOWISE_TRANSPORT_ID => Ok(Arc::new(FlowiseTransport::new(config)?)),
        _ => Err(TransportError::UnsupportedTransport {
            stage: "create-transport",
            transport_id: config.transport_id,
        }),
    }
}
