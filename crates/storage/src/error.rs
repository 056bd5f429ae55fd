use snafu::Snafu;

use super::ids::ChatId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("chat '{chat_id}' does not exist"))]
    ChatNotFound {
        stage: &'static str,
        chat_id: ChatId,
    },
    #[snafu(display("chat '{chat_id}' was deleted"))]
    ChatDeleted {
        stage: &'static str,
        chat_id: ChatId,
    },
    #[snafu(display("message cannot be empty"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("message has {chars} characters, at most {max} are allowed"))]
    MessageTooLong {
        stage: &'static str,
        chars: usize,
        max: usize,
    },
    #[snafu(display("'{raw}' is not a valid {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("stored row is invalid on `{stage}`: {details}"))]
    CorruptRow {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to create database directory {path}: {source}"))]
    CreateDatabaseDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("invalid database location '{database_url}': {source}"))]
    ParseDatabaseUrl {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to open database '{database_url}': {source}"))]
    Connect {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to set sqlite pragma '{pragma}': {source}"))]
    Pragma {
        stage: &'static str,
        pragma: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("failed to migrate chat database: {source}"))]
    Migrate {
        stage: &'static str,
        source: sqlx::migrate::MigrateError,
    },
    #[snafu(display("database query failed on `{stage}`: {source}"))]
    Query {
        stage: &'static str,
        source: sqlx::Error,
    },
}

impl StorageError {
    /// True for input the store refused, as opposed to a database failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ChatDeleted { .. } | Self::EmptyMessage { .. } | Self::MessageTooLong { .. }
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
