mod support;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use trickle_chat::stream::normalize;
use trickle_chat::{
    ChatEvent, ErrorKind, MessageStatus, SessionConfig, StorePersister, TurnOutcome, TurnState,
};
use trickle_llm::{ContextMessage, Role, TransportError};
use trickle_storage::{ChatId, ChatStore, MessageStore, SqliteStorage};

use support::{FakePersister, FakeTransport, Script, chat_with, commits, drain, next_commit};

fn assistant_reply(chat: &trickle_chat::Chat) -> &trickle_chat::Message {
    match chat.conversation().messages.last() {
        Some(message) if message.role == Role::Assistant => message,
        other => panic!("expected an assistant message last, got {other:?}"),
    }
}

/// Splits `bytes` at `cuts - 1` distinct random offsets.
fn random_chunks(bytes: &[u8], cuts: usize, seed: u64) -> Vec<Bytes> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut offsets = rand::seq::index::sample(&mut rng, bytes.len() - 1, cuts - 1)
        .into_iter()
        .map(|offset| offset + 1)
        .collect::<Vec<_>>();
    offsets.sort_unstable();

    let mut chunks = Vec::with_capacity(cuts);
    let mut start = 0;
    for end in offsets.into_iter().chain([bytes.len()]) {
        chunks.push(Bytes::copy_from_slice(&bytes[start..end]));
        start = end;
    }
    chunks
}

fn numbered_reply() -> (String, String) {
    let tokens = (0..200).map(|index| format!("wé{index} ")).collect::<Vec<_>>();
    let mut body = tokens
        .iter()
        .map(|token| format!("data: {}\n\n", serde_json::json!({ "token": token })))
        .collect::<String>();
    body.push_str("data: [DONE]\n\n");
    (body, tokens.concat())
}

#[tokio::test(start_paused = true)]
async fn random_chunk_splits_settle_on_the_normalized_reply() {
    let (body, accumulated) = numbered_reply();
    let expected = normalize(&accumulated);
    let chunks = random_chunks(body.as_bytes(), 500, 42);
    assert_eq!(chunks.len(), 500);

    let transport = FakeTransport::new([Script::Chunks {
        chunks: chunks.into_iter().map(Ok).collect(),
        delay: Duration::from_millis(2),
    }]);
    let persister = Arc::new(FakePersister::default());
    let (mut chat, mut events) = chat_with(transport, persister.clone());

    let outcome = chat.send_message("Count for me").await;
    assert!(matches!(outcome, Some(TurnOutcome::Completed { .. })));

    let reply = assistant_reply(&chat);
    assert_eq!(reply.content, expected);
    assert_eq!(reply.status, MessageStatus::Sent);
    assert!(matches!(
        chat.conversation().turn_state,
        TurnState::Completed(_)
    ));

    let committed = commits(&drain(&mut events));
    assert!(committed.len() > 1, "commits should be paced during the stream");
    assert_eq!(committed.last(), Some(&expected));
    for snapshot in &committed {
        assert!(expected.starts_with(snapshot.as_str()), "{snapshot:?}");
    }

    let saves = persister.attempts(Role::Assistant);
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].content, expected);
    assert_eq!(saves[0].title_hint.as_deref(), Some("Count for me"));
}

#[tokio::test(start_paused = true)]
async fn different_chunkings_give_the_same_reply() {
    let (body, accumulated) = numbered_reply();
    let mut replies = Vec::new();

    for (cuts, seed) in [(2, 1), (37, 2), (500, 3)] {
        let transport = FakeTransport::new([Script::Chunks {
            chunks: random_chunks(body.as_bytes(), cuts, seed)
                .into_iter()
                .map(Ok)
                .collect(),
            delay: Duration::ZERO,
        }]);
        let (mut chat, _events) = chat_with(transport, Arc::new(FakePersister::default()));
        chat.send_message("Count for me").await;
        replies.push(assistant_reply(&chat).content.clone());
    }

    let expected = normalize(&accumulated);
    assert_eq!(replies, vec![expected.clone(), expected.clone(), expected]);
}

/// Lets the turn read everything already sent without letting the paused
/// clock reach the next commit.
async fn let_turn_catch_up() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn cancelling_mid_stream_keeps_everything_received() {
    let (sender, receiver) = mpsc::unbounded_channel::<Bytes>();
    let transport = FakeTransport::new([Script::Channel(receiver)]);
    let persister = Arc::new(FakePersister::default());
    let (mut chat, mut events) = chat_with(transport, persister.clone());
    let handle = chat.cancel_handle();

    let driver = async {
        sender
            .send(Bytes::from_static(b"data: \"Once upon\"\n\n"))
            .unwrap();
        let committed = next_commit(&mut events).await;
        sender
            .send(Bytes::from_static(b"data: \" a time\"\n\n"))
            .unwrap();
        let_turn_catch_up().await;
        assert!(handle.cancel());
        committed
    };
    let (outcome, committed) = tokio::join!(chat.send_message("Tell me a story"), driver);

    assert!(matches!(outcome, Some(TurnOutcome::Cancelled { .. })));
    assert_eq!(committed, "Once upon");

    let reply = assistant_reply(&chat);
    assert_eq!(reply.content, "Once upon a time");
    assert_eq!(reply.status, MessageStatus::Pending);
    assert_eq!(
        commits(&drain(&mut events)).last().map(String::as_str),
        Some("Once upon a time")
    );
    assert!(matches!(
        chat.conversation().turn_state,
        TurnState::Cancelled(_)
    ));
    assert!(!chat.conversation().indicators.loading);
    assert!(!handle.is_active());
    assert!(persister.attempts(Role::Assistant).is_empty());
    assert_eq!(persister.attempts(Role::User).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelling_before_the_first_commit_keeps_the_text() {
    let (sender, receiver) = mpsc::unbounded_channel::<Bytes>();
    let transport = FakeTransport::new([Script::Channel(receiver)]);
    let persister = Arc::new(FakePersister::default());
    let (mut chat, _events) = chat_with(transport, persister.clone());
    let handle = chat.cancel_handle();

    let driver = async {
        sender
            .send(Bytes::from_static(b"data: \"Once upon a time\"\n\n"))
            .unwrap();
        let_turn_catch_up().await;
        assert!(handle.cancel());
    };
    let (outcome, ()) = tokio::join!(chat.send_message("Tell me a story"), driver);

    assert!(matches!(outcome, Some(TurnOutcome::Cancelled { .. })));
    assert_eq!(assistant_reply(&chat).content, "Once upon a time");
    assert!(persister.attempts(Role::Assistant).is_empty());
}

#[tokio::test]
async fn echoed_prompt_and_doubled_words_are_cleaned() {
    let transport = FakeTransport::new([Script::sse(&[
        "\"Hello\"",
        "\" there\"",
        "\" Hello there\"",
        "\", how can I help?\"",
        "{\"event\":\"token\",\"data\":\" Just ask ask.\"}",
        "[DONE]",
    ])]);
    let persister = Arc::new(FakePersister::default());
    let (mut chat, _events) = chat_with(transport, persister.clone());

    chat.send_message("Hello there").await;

    let reply = assistant_reply(&chat);
    assert_eq!(reply.content, "how can I help? Just ask.");
    assert_eq!(
        persister.attempts(Role::Assistant)[0].content,
        "how can I help? Just ask."
    );
}

#[tokio::test]
async fn full_text_completions_are_normalized() {
    let transport = FakeTransport::new([Script::Text("ECHECHO is an acronym DONE".into())]);
    let (mut chat, mut events) = chat_with(transport, Arc::new(FakePersister::default()));

    chat.send_message("What is ECHO?").await;

    assert_eq!(assistant_reply(&chat).content, "ECHO is an acronym");
    assert_eq!(
        commits(&drain(&mut events)),
        vec!["ECHO is an acronym".to_string()]
    );
}

#[tokio::test]
async fn transport_failures_annotate_the_reply() {
    let transport = FakeTransport::new([Script::Fail(TransportError::Status {
        stage: "test",
        status: 502,
        detail: ": bad gateway".into(),
    })]);
    let persister = Arc::new(FakePersister::default());
    let (mut chat, _events) = chat_with(transport, persister.clone());

    let outcome = chat.send_message("Hi").await;
    assert!(matches!(outcome, Some(TurnOutcome::Failed { .. })));

    let reply = assistant_reply(&chat);
    assert_eq!(reply.content, "Error: completion endpoint error 502: bad gateway");
    assert_eq!(reply.status, MessageStatus::Failed);

    let conversation = chat.conversation();
    assert!(matches!(conversation.turn_state, TurnState::Errored { .. }));
    let error = conversation.indicators.error.as_ref().map(|error| error.kind);
    assert_eq!(error, Some(ErrorKind::Generation));
    assert!(persister.attempts(Role::Assistant).is_empty());
}

#[tokio::test]
async fn empty_completions_report_no_response() {
    let transport = FakeTransport::new([Script::Empty]);
    let (mut chat, _events) = chat_with(transport, Arc::new(FakePersister::default()));

    chat.send_message("Hi").await;
    assert_eq!(
        assistant_reply(&chat).content,
        "Error: No response from assistant."
    );
}

#[tokio::test]
async fn stream_failures_keep_partial_text() {
    let transport = FakeTransport::new([Script::Chunks {
        chunks: vec![
            Ok(Bytes::from_static(b"data: \"Partial answer\"\n\n")),
            Err(TransportError::ReadChunk {
                stage: "test",
                message: "connection reset".into(),
            }),
        ],
        delay: Duration::ZERO,
    }]);
    let (mut chat, _events) = chat_with(transport, Arc::new(FakePersister::default()));

    chat.send_message("Hi").await;

    let reply = assistant_reply(&chat);
    assert_eq!(
        reply.content,
        "Partial answer\n\nError: Streaming failed: completion stream failed: connection reset"
    );
    assert_eq!(reply.status, MessageStatus::Failed);
}

#[tokio::test]
async fn failed_saves_keep_the_reply_and_flag_a_save_error() {
    let transport = FakeTransport::new([Script::Text("All done here.".into())]);
    let persister = Arc::new(FakePersister::rejecting_assistant());
    let (mut chat, _events) = chat_with(transport, persister);

    let outcome = chat.send_message("Hi").await;
    match outcome {
        Some(TurnOutcome::Failed { error, .. }) => assert!(error.is_save_error()),
        other => panic!("expected a save failure, got {other:?}"),
    }

    let reply = assistant_reply(&chat);
    assert_eq!(reply.content, "All done here.");
    assert_eq!(reply.status, MessageStatus::Failed);

    let conversation = chat.conversation();
    assert!(matches!(conversation.turn_state, TurnState::Completed(_)));
    let error = conversation.indicators.error.as_ref().map(|error| error.kind);
    assert_eq!(error, Some(ErrorKind::Save));
}

#[tokio::test]
async fn retry_replays_the_same_context() {
    let transport = FakeTransport::new([
        Script::Fail(TransportError::ReadChunk {
            stage: "test",
            message: "timeout".into(),
        }),
        Script::Text("Second time lucky.".into()),
    ]);
    let (mut chat, _events) = chat_with(transport.clone(), Arc::new(FakePersister::default()));

    chat.send_message("Hi").await;
    let outcome = chat.retry().await;
    assert!(matches!(outcome, Some(TurnOutcome::Completed { .. })));
    assert_eq!(assistant_reply(&chat).content, "Second time lucky.");
    assert_eq!(chat.conversation().indicators.error, None);

    let contexts = transport.contexts();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[0], vec![ContextMessage::new(Role::User, "Hi")]);
    assert_eq!(contexts[0], contexts[1]);
}

#[tokio::test]
async fn blank_input_starts_no_turn() {
    let transport = FakeTransport::new([]);
    let (mut chat, mut events) = chat_with(transport.clone(), Arc::new(FakePersister::default()));

    assert!(chat.send_message("   \n").await.is_none());
    assert!(chat.retry().await.is_none());
    assert!(chat.conversation().messages.is_empty());
    assert!(transport.contexts().is_empty());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn turns_survive_a_reload_from_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    let storage = Arc::new(SqliteStorage::open("sqlite::memory:").await?);
    let store: Arc<dyn MessageStore> = storage.clone();
    let chat_id = ChatId::new_v7();
    let persister = Arc::new(StorePersister::new(store, chat_id));

    let (sender, _events) = mpsc::unbounded_channel::<ChatEvent>();
    let mut chat = trickle_chat::Chat::new(
        chat_id,
        FakeTransport::new([Script::Text("Hello! How can I help?".into())]),
        persister.clone(),
        Box::new(sender),
        SessionConfig::default(),
    );
    chat.send_message("Hi").await;

    let (sender, _events) = mpsc::unbounded_channel::<ChatEvent>();
    let mut reloaded = trickle_chat::Chat::new(
        chat_id,
        FakeTransport::new([]),
        persister,
        Box::new(sender),
        SessionConfig::default(),
    );
    assert_eq!(reloaded.load_history().await?, 2);

    let history = reloaded
        .conversation()
        .messages
        .iter()
        .map(|message| (message.role, message.content.as_str(), message.status))
        .collect::<Vec<_>>();
    assert_eq!(
        history,
        vec![
            (Role::User, "Hi", MessageStatus::Sent),
            (Role::Assistant, "Hello! How can I help?", MessageStatus::Sent),
        ]
    );

    let title = storage.get_chat(chat_id).await?.and_then(|chat| chat.title);
    assert_eq!(title.as_deref(), Some("Hi"));
    Ok(())
}
