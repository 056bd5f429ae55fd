//! Scripted collaborators for driving whole turns.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use trickle_chat::{Chat, ChatEvent, PersistOutcome, Persister, SessionConfig};
use trickle_llm::{
    BoxFuture, Completion, CompletionTransport, ContextMessage, Role, TransportError,
    TransportResult,
};
use trickle_storage::{ChatId, MessageId, MessageRecord, StorageResult};

/// What the fake backend answers with, one script per request.
pub enum Script {
    /// Chunks delivered `delay` apart.
    Chunks {
        chunks: Vec<TransportResult<Bytes>>,
        delay: Duration,
    },
    /// Chunks pushed by the test while the turn runs.
    Channel(UnboundedReceiver<Bytes>),
    Text(String),
    Fail(TransportError),
    Empty,
}

impl Script {
    pub fn sse(payloads: &[&str]) -> Self {
        let chunks = payloads
            .iter()
            .map(|payload| Ok(Bytes::from(format!("data: {payload}\n\n"))))
            .collect();
        Self::Chunks {
            chunks,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
pub struct FakeTransport {
    scripts: Mutex<VecDeque<Script>>,
    contexts: Mutex<Vec<Vec<ContextMessage>>>,
}

impl FakeTransport {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn contexts(&self) -> Vec<Vec<ContextMessage>> {
        self.contexts.lock().unwrap().clone()
    }
}

impl CompletionTransport for FakeTransport {
    fn id(&self) -> &str {
        "fake"
    }

    fn get_completion<'a>(
        &'a self,
        context: &'a [ContextMessage],
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, TransportResult<Completion>> {
        self.contexts.lock().unwrap().push(context.to_vec());
        let script = self.scripts.lock().unwrap().pop_front();

        Box::pin(async move {
            match script {
                Some(Script::Chunks { chunks, delay }) => {
                    let stream = futures::stream::iter(chunks)
                        .then(move |chunk| async move {
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                            chunk
                        })
                        .boxed();
                    Ok(Completion::stream(stream))
                }
                Some(Script::Channel(receiver)) => {
                    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
                        let bytes = receiver.recv().await?;
                        Some((Ok(bytes), receiver))
                    })
                    .boxed();
                    Ok(Completion::stream(stream))
                }
                Some(Script::Text(text)) => Ok(Completion::text(text)),
                Some(Script::Fail(error)) => Err(error),
                Some(Script::Empty) | None => Ok(Completion::empty()),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveAttempt {
    pub role: Role,
    pub content: String,
    pub title_hint: Option<String>,
}

#[derive(Default)]
pub struct FakePersister {
    attempts: Mutex<Vec<SaveAttempt>>,
    reject_assistant: bool,
}

impl FakePersister {
    pub fn rejecting_assistant() -> Self {
        Self {
            reject_assistant: true,
            ..Self::default()
        }
    }

    pub fn attempts(&self, role: Role) -> Vec<SaveAttempt> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|attempt| attempt.role == role)
            .cloned()
            .collect()
    }
}

impl Persister for FakePersister {
    fn persist_message<'a>(
        &'a self,
        role: Role,
        content: &'a str,
        title_hint: Option<&'a str>,
    ) -> BoxFuture<'a, PersistOutcome> {
        self.attempts.lock().unwrap().push(SaveAttempt {
            role,
            content: content.to_string(),
            title_hint: title_hint.map(str::to_string),
        });
        let reject = self.reject_assistant && role == Role::Assistant;

        Box::pin(async move {
            if reject {
                PersistOutcome::Rejected {
                    error: "disk full".to_string(),
                }
            } else {
                PersistOutcome::Saved {
                    id: MessageId::new_v7(),
                }
            }
        })
    }

    fn load_messages(&self) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

pub fn chat_with(
    transport: Arc<FakeTransport>,
    persister: Arc<dyn Persister>,
) -> (Chat, UnboundedReceiver<ChatEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let chat = Chat::new(
        ChatId::new_v7(),
        transport,
        persister,
        Box::new(sender),
        SessionConfig::default(),
    );
    (chat, receiver)
}

/// Everything emitted so far, without waiting.
pub fn drain(events: &mut UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn commits(events: &[ChatEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ChatEvent::ContentCommitted { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect()
}

/// Waits for the next committed snapshot.
pub async fn next_commit(events: &mut UnboundedReceiver<ChatEvent>) -> String {
    while let Some(event) = events.recv().await {
        if let ChatEvent::ContentCommitted { content, .. } = event {
            return content;
        }
    }
    panic!("event channel closed before a commit");
}
