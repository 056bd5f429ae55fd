use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use trickle_chat::{Chat, ChatEvent, TurnOutcome};

use crate::error::{AppResult, TerminalSnafu};
use crate::render::Renderer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Retry,
    Quit,
}

/// `None` for blank lines.
pub fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    match line {
        "" => None,
        "/retry" => Some(Input::Retry),
        "/quit" | "/exit" => Some(Input::Quit),
        text => Some(Input::Message(text.to_string())),
    }
}

/// Reads lines from stdin until end of input, `/quit`, or Ctrl-C at the
/// prompt. Ctrl-C during a turn cancels that turn instead.
pub async fn run<W: AsyncWrite + Unpin>(
    mut chat: Chat,
    mut events: UnboundedReceiver<ChatEvent>,
    mut renderer: Renderer<W>,
) -> AppResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    drain_events(&mut events, &mut renderer).await?;

    loop {
        renderer.prompt().await.context(TerminalSnafu {
            stage: "print-prompt",
        })?;

        let line = tokio::select! {
            line = lines.next_line() => line.context(TerminalSnafu { stage: "read-input" })?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_input(&line) {
            None => continue,
            Some(Input::Quit) => break,
            Some(input) => run_turn(&mut chat, &mut events, &mut renderer, input).await?,
        }
    }

    tracing::info!(chat_id = %chat.chat_id(), "leaving chat");
    Ok(())
}

async fn run_turn<W: AsyncWrite + Unpin>(
    chat: &mut Chat,
    events: &mut UnboundedReceiver<ChatEvent>,
    renderer: &mut Renderer<W>,
    input: Input,
) -> AppResult<()> {
    let cancel = chat.cancel_handle();
    let retrying = input == Input::Retry;
    let turn = async {
        match input {
            Input::Message(text) => chat.send_message(&text).await,
            Input::Retry => chat.retry().await,
            Input::Quit => None,
        }
    };
    tokio::pin!(turn);

    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome,
            Some(event) = events.recv() => {
                renderer.render(event).await.context(TerminalSnafu { stage: "render-event" })?;
            }
            _ = tokio::signal::ctrl_c() => {
                if cancel.cancel() {
                    tracing::debug!("cancel requested from the terminal");
                }
            }
        }
    };
    drain_events(events, renderer).await?;

    match outcome {
        None if retrying => renderer
            .notice("nothing to retry yet")
            .await
            .context(TerminalSnafu {
                stage: "print-notice",
            })?,
        Some(TurnOutcome::Failed { error, .. }) => {
            tracing::debug!(error = %error, save_error = error.is_save_error(), "turn failed");
        }
        _ => {}
    }
    Ok(())
}

async fn drain_events<W: AsyncWrite + Unpin>(
    events: &mut UnboundedReceiver<ChatEvent>,
    renderer: &mut Renderer<W>,
) -> AppResult<()> {
    while let Ok(event) = events.try_recv() {
        renderer.render(event).await.context(TerminalSnafu {
            stage: "render-event",
        })?;
    }
    Ok(())
}
