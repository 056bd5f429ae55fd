use std::sync::Arc;

use arc_swap::ArcSwapOption;
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trickle_llm::{Completion, CompletionTransport, ContextMessage, Role, TransportError};
use trickle_storage::{ChatId, MessageId};

use super::events::{ChatEvent, ChatObserver};
use super::message::{
    ChatErrorState, Conversation, ErrorKind, Indicators, LocalMessageId, Message, TurnId,
    TurnTransition,
};
use super::persist::{PersistOutcome, Persister};
use super::session::{StreamEnd, StreamSession};
use crate::config::SessionConfig;
use crate::error::{ChatResult, LoadHistorySnafu, TurnError};
use crate::stream::CommitTarget;

/// Terminal result of one assistant turn.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed {
        message_id: LocalMessageId,
        server_id: MessageId,
    },
    Failed {
        message_id: LocalMessageId,
        error: TurnError,
    },
    Cancelled {
        message_id: LocalMessageId,
    },
}

impl TurnOutcome {
    pub fn message_id(&self) -> &LocalMessageId {
        match self {
            Self::Completed { message_id, .. }
            | Self::Failed { message_id, .. }
            | Self::Cancelled { message_id } => message_id,
        }
    }
}

/// Cancels whichever turn is in flight. Cheap to clone and usable while the
/// chat itself is busy awaiting that turn.
#[derive(Clone, Default)]
pub struct CancelHandle {
    active: Arc<ArcSwapOption<CancellationToken>>,
}

impl CancelHandle {
    /// Returns false when no turn was running.
    pub fn cancel(&self) -> bool {
        match self.active.load_full() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load().is_some()
    }
}

/// How the request and read phases of a turn ended.
enum TurnEnd {
    Finished,
    Cancelled,
    Failed(TurnError),
}

/// A user message save still running in the background.
struct PendingSave {
    message_id: LocalMessageId,
    handle: JoinHandle<PersistOutcome>,
}

/// Writes committed snapshots into the in-flight assistant message.
struct LiveMessage<'a> {
    conversation: &'a mut Conversation,
    observer: &'a mut dyn ChatObserver,
    message_id: &'a LocalMessageId,
}

impl CommitTarget for LiveMessage<'_> {
    fn write_content(&mut self, content: &str) {
        if let Some(message) = self.conversation.message_mut(self.message_id) {
            message.content = content.to_string();
        }
        self.observer.on_event(ChatEvent::ContentCommitted {
            message_id: self.message_id.clone(),
            content: content.to_string(),
        });
    }

    fn composing_finished(&mut self) {
        self.conversation.indicators.composing = false;
        self.observer
            .on_event(ChatEvent::IndicatorsChanged(self.conversation.indicators.clone()));
    }

    fn scroll_to_bottom(&mut self) {
        self.observer.on_event(ChatEvent::ScrollToBottom);
    }
}

/// One conversation: its transcript, its collaborators, and at most one turn
/// in flight.
pub struct Chat {
    conversation: Conversation,
    transport: Arc<dyn CompletionTransport>,
    persister: Arc<dyn Persister>,
    observer: Box<dyn ChatObserver>,
    config: SessionConfig,
    cancel: CancelHandle,
    last_turn: TurnId,
    last_context: Option<Vec<Message>>,
}

impl Chat {
    pub fn new(
        chat_id: ChatId,
        transport: Arc<dyn CompletionTransport>,
        persister: Arc<dyn Persister>,
        observer: Box<dyn ChatObserver>,
        config: SessionConfig,
    ) -> Self {
        Self {
            conversation: Conversation::new(chat_id),
            transport,
            persister,
            observer,
            config,
            cancel: CancelHandle::default(),
            last_turn: TurnId::new(0),
            last_context: None,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn chat_id(&self) -> ChatId {
        self.conversation.chat_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    /// Replaces the transcript with the stored history of this chat.
    pub async fn load_history(&mut self) -> ChatResult<usize> {
        let records = self
            .persister
            .load_messages()
            .await
            .context(LoadHistorySnafu {
                stage: "chat-load-history",
            })?;
        self.conversation.replace_history(&records);

        let count = records.len();
        tracing::info!(chat_id = %self.chat_id(), count, "chat history loaded");
        self.observer.on_event(ChatEvent::HistoryLoaded { count });
        Ok(count)
    }

    /// Appends a user message and runs an assistant turn for it. Blank input
    /// is ignored and yields `None`.
    pub async fn send_message(&mut self, content: &str) -> Option<TurnOutcome> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }

        let message = Message::new(self.chat_id(), Role::User, content);
        let message_id = message.id.clone();
        let appended = self.conversation.push(message).clone();
        self.observer.on_event(ChatEvent::MessageAppended(appended));

        let persister = Arc::clone(&self.persister);
        let text = content.to_string();
        let handle = tokio::spawn(async move {
            persister
                .persist_message(Role::User, &text, Some(&text))
                .await
        });

        let context = self.conversation.context_window(self.config.context_window);
        let outcome = self
            .run_turn(context, Some(PendingSave { message_id, handle }))
            .await;
        Some(outcome)
    }

    /// Replays the last turn's context through a fresh session. `None` when
    /// nothing has been sent yet.
    pub async fn retry(&mut self) -> Option<TurnOutcome> {
        let context = self.last_context.clone()?;
        self.update_indicators(|indicators| indicators.error = None);
        Some(self.run_turn(context, None).await)
    }

    async fn run_turn(
        &mut self,
        context: Vec<Message>,
        user_save: Option<PendingSave>,
    ) -> TurnOutcome {
        self.last_turn = self.last_turn.next();
        let turn = self.last_turn;
        self.transition(TurnTransition::Start(turn));
        self.last_context = Some(context.clone());

        let cancel = CancellationToken::new();
        self.cancel.active.store(Some(Arc::new(cancel.clone())));

        let placeholder = Message::assistant_placeholder(self.chat_id());
        let message_id = placeholder.id.clone();
        let appended = self.conversation.push(placeholder).clone();
        self.observer.on_event(ChatEvent::MessageAppended(appended));
        self.update_indicators(|indicators| {
            *indicators = Indicators {
                loading: true,
                composing: true,
                error: None,
            }
        });

        let last_user = context
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.trim().to_string())
            .unwrap_or_default();
        let request = context.iter().map(Message::to_context).collect::<Vec<_>>();
        tracing::info!(
            chat_id = %self.chat_id(),
            turn = turn.0,
            context_messages = request.len(),
            "assistant turn started"
        );

        let mut session = StreamSession::new(&last_user, &self.config);
        let ended = self
            .drive(turn, &message_id, &request, &mut session, &cancel)
            .await;
        self.cancel.active.store(None);

        let outcome = match ended {
            TurnEnd::Finished => {
                self.settle_user_save(user_save).await;
                self.complete(turn, message_id, &last_user).await
            }
            TurnEnd::Failed(error) => {
                session.flush(&mut self.live_message(&message_id));
                self.settle_user_save(user_save).await;
                self.fail(turn, message_id, error)
            }
            TurnEnd::Cancelled => {
                session.flush(&mut self.live_message(&message_id));
                self.settle_user_save(user_save).await;
                tracing::info!(
                    chat_id = %self.chat_id(),
                    turn = turn.0,
                    "assistant turn cancelled"
                );
                self.transition(TurnTransition::Cancel(turn));
                TurnOutcome::Cancelled { message_id }
            }
        };
        drop(session);

        self.update_indicators(|indicators| {
            indicators.loading = false;
            indicators.composing = false;
        });
        self.observer
            .on_event(ChatEvent::TurnFinished(self.conversation.turn_state.clone()));
        outcome
    }

    /// Requests a completion and reads it into `session`.
    async fn drive(
        &mut self,
        turn: TurnId,
        message_id: &LocalMessageId,
        request: &[ContextMessage],
        session: &mut StreamSession,
        cancel: &CancellationToken,
    ) -> TurnEnd {
        let transport = Arc::clone(&self.transport);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TurnEnd::Cancelled,
            response = transport.get_completion(request, cancel.clone()) => response,
        };

        let completion = match response {
            Ok(completion) if completion.is_empty() => {
                return TurnEnd::Failed(TurnError::EmptyCompletion {
                    stage: "turn-request",
                });
            }
            Ok(completion) => completion,
            Err(TransportError::Aborted { .. }) => return TurnEnd::Cancelled,
            Err(source) => {
                return TurnEnd::Failed(TurnError::Transport {
                    stage: "turn-request",
                    source,
                });
            }
        };
        self.transition(TurnTransition::StreamOpened(turn));

        let mut target = self.live_message(message_id);
        let Completion { stream, text } = completion;
        if let Some(mut stream) = stream {
            let end = session.read_stream(&mut stream, cancel, &mut target).await;
            match end {
                StreamEnd::Finished => {}
                StreamEnd::Cancelled => return TurnEnd::Cancelled,
                StreamEnd::Failed(source) => {
                    return TurnEnd::Failed(TurnError::StreamRead {
                        stage: "turn-read-stream",
                        source,
                    });
                }
            }
        } else if let Some(text) = text {
            session.push_token(&text);
        }

        session.finish(&mut target);
        TurnEnd::Finished
    }

    async fn complete(
        &mut self,
        turn: TurnId,
        message_id: LocalMessageId,
        last_user: &str,
    ) -> TurnOutcome {
        let content = self
            .conversation
            .message(&message_id)
            .map(|message| message.content.clone())
            .unwrap_or_default();
        if content.trim().is_empty() {
            let error = TurnError::EmptyReply {
                stage: "turn-complete",
            };
            return self.fail(turn, message_id, error);
        }

        let hint = (!last_user.is_empty()).then_some(last_user);
        let outcome = self
            .persister
            .persist_message(Role::Assistant, &content, hint)
            .await;
        self.transition(TurnTransition::Complete(turn));

        match outcome {
            PersistOutcome::Saved { id } => {
                self.settle_message(&message_id, PersistOutcome::Saved { id });
                tracing::info!(
                    chat_id = %self.chat_id(),
                    turn = turn.0,
                    message_id = %id,
                    chars = content.chars().count(),
                    "assistant turn completed"
                );
                TurnOutcome::Completed {
                    message_id,
                    server_id: id,
                }
            }
            PersistOutcome::Rejected { error } => {
                self.settle_message(
                    &message_id,
                    PersistOutcome::Rejected {
                        error: error.clone(),
                    },
                );
                let error = TurnError::Persistence {
                    stage: "turn-persist",
                    message: error,
                };
                self.raise_error(ErrorKind::Save, &error);
                TurnOutcome::Failed { message_id, error }
            }
        }
    }

    fn fail(&mut self, turn: TurnId, message_id: LocalMessageId, error: TurnError) -> TurnOutcome {
        tracing::error!(
            chat_id = %self.chat_id(),
            turn = turn.0,
            error = %error,
            "assistant turn failed"
        );

        let annotation = format!("Error: {error}");
        if let Some(message) = self.conversation.message_mut(&message_id) {
            message.content = if message.content.trim().is_empty() {
                annotation
            } else {
                format!("{}\n\n{annotation}", message.content)
            };
            let content = message.content.clone();
            self.observer.on_event(ChatEvent::ContentCommitted {
                message_id: message_id.clone(),
                content,
            });
        }
        self.settle_message(
            &message_id,
            PersistOutcome::Rejected {
                error: error.to_string(),
            },
        );

        self.transition(TurnTransition::Fail {
            turn,
            message: error.to_string(),
        });
        self.raise_error(ErrorKind::Generation, &error);
        TurnOutcome::Failed { message_id, error }
    }

    async fn settle_user_save(&mut self, pending: Option<PendingSave>) {
        let Some(PendingSave { message_id, handle }) = pending else {
            return;
        };
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => PersistOutcome::Rejected {
                error: join_error.to_string(),
            },
        };
        if let PersistOutcome::Rejected { error } = &outcome {
            tracing::warn!(chat_id = %self.chat_id(), error = %error, "user message was not saved");
        }
        self.settle_message(&message_id, outcome);
    }

    /// Moves a message out of `Pending` according to a save outcome.
    fn settle_message(&mut self, message_id: &LocalMessageId, outcome: PersistOutcome) {
        let Some(message) = self.conversation.message_mut(message_id) else {
            return;
        };
        let settled = match outcome {
            PersistOutcome::Saved { id } => message.mark_sent(id),
            PersistOutcome::Rejected { .. } => message.mark_failed(),
        };
        match settled {
            Ok(()) => {
                let status = message.status;
                self.observer.on_event(ChatEvent::StatusChanged {
                    message_id: message_id.clone(),
                    status,
                });
            }
            Err(rejection) => {
                tracing::warn!(message_id = %message_id, ?rejection, "message status not changed");
            }
        }
    }

    fn raise_error(&mut self, kind: ErrorKind, error: &TurnError) {
        let state = ChatErrorState {
            kind,
            message: error.to_string(),
        };
        self.update_indicators(|indicators| indicators.error = Some(state));
    }

    fn transition(&mut self, transition: TurnTransition) {
        if let Err(rejection) = self.conversation.apply_turn_transition(transition) {
            tracing::warn!(?rejection, "turn transition rejected");
        }
    }

    fn update_indicators(&mut self, update: impl FnOnce(&mut Indicators)) {
        update(&mut self.conversation.indicators);
        self.observer
            .on_event(ChatEvent::IndicatorsChanged(self.conversation.indicators.clone()));
    }

    fn live_message<'a>(&'a mut self, message_id: &'a LocalMessageId) -> LiveMessage<'a> {
        LiveMessage {
            conversation: &mut self.conversation,
            observer: self.observer.as_mut(),
            message_id,
        }
    }
}
