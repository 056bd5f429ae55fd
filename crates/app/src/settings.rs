use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use trickle_chat::SessionConfig;
use trickle_llm::{FLOWISE_TRANSPORT_ID, TransportConfig};

pub const SETTINGS_DIRECTORY_NAME: &str = "trickle";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "chats.db";
pub const ENV_PREFIX: &str = "TRICKLE_";

/// Per-turn tuning, mirrored onto [`SessionConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub context_window: usize,
    pub commit_interval_ms: u64,
    pub scroll_interval_ms: u64,
    pub echo_give_up_chars: usize,
    pub duplicate_token_max_chars: usize,
    pub duplicate_tail_min_chars: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            context_window: session.context_window,
            commit_interval_ms: duration_millis(session.commit_interval),
            scroll_interval_ms: duration_millis(session.scroll_interval),
            echo_give_up_chars: session.echo_give_up_chars,
            duplicate_token_max_chars: session.duplicate_token_max_chars,
            duplicate_tail_min_chars: session.duplicate_tail_min_chars,
        }
    }
}

impl StreamSettings {
    fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.context_window == 0 {
            self.context_window = defaults.context_window;
        }
        if self.commit_interval_ms == 0 {
            self.commit_interval_ms = defaults.commit_interval_ms;
        }
        if self.scroll_interval_ms == 0 {
            self.scroll_interval_ms = defaults.scroll_interval_ms;
        }
        self
    }

    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            context_window: self.context_window,
            commit_interval: Duration::from_millis(self.commit_interval_ms),
            scroll_interval: Duration::from_millis(self.scroll_interval_ms),
            echo_give_up_chars: self.echo_give_up_chars,
            duplicate_token_max_chars: self.duplicate_token_max_chars,
            duplicate_tail_min_chars: self.duplicate_tail_min_chars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub transport: String,
    pub endpoint: String,
    pub api_key: String,
    /// Sqlite path; blank means the per-user data directory.
    pub database: String,
    /// Chat to resume. A new chat is started when absent.
    pub chat_id: Option<String>,
    pub stream: StreamSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transport: FLOWISE_TRANSPORT_ID.to_string(),
            endpoint: String::new(),
            api_key: String::new(),
            database: String::new(),
            chat_id: None,
            stream: StreamSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, then the JSON file at `path`, then `TRICKLE_*` variables.
    /// Nested keys use a double underscore: `TRICKLE_STREAM__COMMIT_INTERVAL_MS`.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Self {
        match figment.extract::<Self>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(error = %error, "failed to parse settings, using defaults");
                Self::default()
            }
        }
    }

    /// Command-line values win over everything else.
    pub fn with_overrides(
        mut self,
        endpoint: Option<String>,
        database: Option<String>,
        chat_id: Option<String>,
    ) -> Self {
        if let Some(endpoint) = endpoint {
            self.endpoint = endpoint;
        }
        if let Some(database) = database {
            self.database = database;
        }
        if chat_id.is_some() {
            self.chat_id = chat_id;
        }
        self.normalized()
    }

    pub fn normalized(mut self) -> Self {
        self.transport = if self.transport.trim().is_empty() {
            FLOWISE_TRANSPORT_ID.to_string()
        } else {
            self.transport.trim().to_string()
        };
        self.endpoint = self.endpoint.trim().to_string();
        self.api_key = self.api_key.trim().to_string();
        self.database = self.database.trim().to_string();
        self.chat_id = self
            .chat_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        self.stream = self.stream.normalized();
        self
    }

    pub fn database_location(&self) -> String {
        if self.database.is_empty() {
            default_database_path().display().to_string()
        } else {
            self.database.clone()
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::new(
            &self.transport,
            &self.endpoint,
            Some(self.api_key.clone()),
        )
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".trickle"))
        .join(SETTINGS_FILE_NAME)
}

pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".trickle"))
        .join(DATABASE_FILE_NAME)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
