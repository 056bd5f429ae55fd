//! Line-oriented rendering of chat events.
//!
//! Committed snapshots are full texts; the renderer prints only the part not
//! already on screen. When normalization rewrites text that was printed, the
//! reply is reprinted on a fresh line.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use trickle_chat::{
    ChatErrorState, ChatEvent, ErrorKind, LocalMessageId, Message, MessageStatus, TurnState,
};
use trickle_llm::Role;

const TYPING_INDICATOR: &str = "…";
const CLEAR_LINE: &str = "\r\x1b[2K";

fn label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}

pub struct Renderer<W> {
    out: W,
    active: Option<LocalMessageId>,
    printed: String,
    typing: bool,
    shown_error: Option<ChatErrorState>,
}

impl<W: AsyncWrite + Unpin> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            active: None,
            printed: String::new(),
            typing: false,
            shown_error: None,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    pub async fn prompt(&mut self) -> io::Result<()> {
        self.write(&format!("{}> ", label(Role::User))).await?;
        self.out.flush().await
    }

    pub async fn notice(&mut self, text: &str) -> io::Result<()> {
        self.write(&format!("[{text}]\n")).await?;
        self.out.flush().await
    }

    /// Prints a loaded history, oldest first.
    pub async fn transcript(&mut self, messages: &[Message]) -> io::Result<()> {
        for message in messages {
            let marker = match message.status {
                MessageStatus::Failed => " [not saved]",
                MessageStatus::Pending | MessageStatus::Sent => "",
            };
            self.write(&format!("{}> {}{marker}\n", label(message.role), message.content))
                .await?;
        }
        self.out.flush().await
    }

    pub async fn render(&mut self, event: ChatEvent) -> io::Result<()> {
        match event {
            ChatEvent::MessageAppended(message) if message.role == Role::Assistant => {
                self.active = Some(message.id);
                self.printed.clear();
                self.typing = false;
                self.write(&format!("{}> ", label(Role::Assistant))).await?;
            }
            ChatEvent::IndicatorsChanged(indicators) => {
                if indicators.composing
                    && self.active.is_some()
                    && self.printed.is_empty()
                    && !self.typing
                {
                    self.typing = true;
                    self.write(TYPING_INDICATOR).await?;
                }
                // Generation errors already show up in the reply text.
                if indicators.error != self.shown_error {
                    if let Some(error) = &indicators.error
                        && error.kind == ErrorKind::Save
                    {
                        self.write(&format!("\n[{}]", error.message)).await?;
                    }
                    self.shown_error = indicators.error;
                }
            }
            ChatEvent::ContentCommitted {
                message_id,
                content,
            } if self.active.as_ref() == Some(&message_id) => {
                self.show(content).await?;
            }
            ChatEvent::ScrollToBottom => self.out.flush().await?,
            ChatEvent::TurnFinished(state) => {
                if matches!(state, TurnState::Cancelled(_)) {
                    self.write(" [cancelled]").await?;
                }
                self.write("\n").await?;
                self.out.flush().await?;
                self.active = None;
                self.typing = false;
            }
            ChatEvent::HistoryLoaded { count } => {
                tracing::debug!(count, "history loaded");
            }
            other => tracing::trace!(event = ?other, "event not rendered"),
        }
        Ok(())
    }

    async fn show(&mut self, content: String) -> io::Result<()> {
        if self.typing {
            self.typing = false;
            self.write(&format!("{CLEAR_LINE}{}> ", label(Role::Assistant)))
                .await?;
        }

        if let Some(suffix) = content.strip_prefix(self.printed.as_str()) {
            let suffix = suffix.to_string();
            self.write(&suffix).await?;
        } else {
            self.write(&format!("\n{content}")).await?;
        }
        self.printed = content;
        Ok(())
    }

    async fn write(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes()).await
    }
}
