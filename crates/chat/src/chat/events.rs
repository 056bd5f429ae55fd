use tokio::sync::mpsc::UnboundedSender;

use super::message::{Indicators, LocalMessageId, Message, MessageStatus, TurnState};

/// Everything a renderer needs to mirror the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    HistoryLoaded {
        count: usize,
    },
    MessageAppended(Message),
    /// New display text for a message. Always a complete snapshot, never a
    /// delta.
    ContentCommitted {
        message_id: LocalMessageId,
        content: String,
    },
    StatusChanged {
        message_id: LocalMessageId,
        status: MessageStatus,
    },
    IndicatorsChanged(Indicators),
    ScrollToBottom,
    TurnFinished(TurnState),
}

pub trait ChatObserver: Send {
    fn on_event(&mut self, event: ChatEvent);
}

impl ChatObserver for UnboundedSender<ChatEvent> {
    fn on_event(&mut self, event: ChatEvent) {
        if self.send(event).is_err() {
            tracing::trace!("chat event receiver dropped");
        }
    }
}
