#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use snafu::ResultExt;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use trickle_chat::{Chat, StorePersister};
use trickle_storage::{ChatId, MessageStore, SqliteStorage};

use crate::error::{
    AppResult, CreateTransportSnafu, InvalidChatIdSnafu, LoadHistorySnafu, OpenStorageSnafu,
    TerminalSnafu,
};
use crate::render::Renderer;
use crate::settings::Settings;

mod error;
mod render;
mod repl;
mod settings;

/// Terminal chat over a streaming completion endpoint.
#[derive(Debug, Parser)]
#[command(name = "trickle", version)]
struct Cli {
    /// Settings file [default: <config dir>/trickle/settings.json]
    #[arg(long)]
    config: Option<PathBuf>,
    /// Prediction endpoint URL
    #[arg(long)]
    endpoint: Option<String>,
    /// Resume the chat with this id
    #[arg(long)]
    chat: Option<String>,
    /// Sqlite database path
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "trickle stopped");
            eprintln!("trickle: {error}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout belongs to the conversation.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> AppResult<()> {
    let config_path = cli.config.unwrap_or_else(settings::default_config_path);
    let settings =
        Settings::load(&config_path).with_overrides(cli.endpoint, cli.database, cli.chat);

    let transport = trickle_llm::create_transport(settings.transport_config()).context(
        CreateTransportSnafu {
            stage: "create-transport",
        },
    )?;
    let chat_id = match settings.chat_id.as_deref() {
        Some(raw) => ChatId::parse(raw).context(InvalidChatIdSnafu {
            stage: "parse-chat-id",
        })?,
        None => ChatId::new_v7(),
    };

    let database = settings.database_location();
    let storage = SqliteStorage::open(&database)
        .await
        .context(OpenStorageSnafu {
            stage: "open-storage",
        })?;
    let store: Arc<dyn MessageStore> = Arc::new(storage);
    let persister = Arc::new(StorePersister::new(store, chat_id));

    let (sender, events) = mpsc::unbounded_channel();
    let mut chat = Chat::new(
        chat_id,
        transport,
        persister,
        Box::new(sender),
        settings.stream.to_session_config(),
    );
    tracing::info!(chat_id = %chat_id, database = %database, "chat ready");

    let mut renderer = Renderer::new(tokio::io::stdout());
    if settings.chat_id.is_some() {
        chat.load_history().await.context(LoadHistorySnafu {
            stage: "load-history",
        })?;
        renderer
            .transcript(&chat.conversation().messages)
            .await
            .context(TerminalSnafu {
                stage: "print-transcript",
            })?;
    }

    repl::run(chat, events, renderer).await
}
