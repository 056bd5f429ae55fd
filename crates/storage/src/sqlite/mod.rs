use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    ChatDeletedSnafu, ChatNotFoundSnafu, ConnectSnafu, CorruptRowSnafu,
    CreateDatabaseDirectorySnafu, EmptyMessageSnafu, MessageTooLongSnafu, MigrateSnafu,
    ParseDatabaseUrlSnafu, PragmaSnafu, QuerySnafu, StorageError, StorageResult,
};
use super::ids::{ChatId, MessageId};
use super::types::{ChatRecord, MAX_MESSAGE_CHARS, MessageRecord, MessageRole, NewMessage};
use super::{BoxFuture, ChatStore, MessageStore};

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(ParseDatabaseUrlSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // One connection keeps `:memory:` databases alive for the pool's lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context(ConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(PragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(MigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "sqlite storage ready");
        Ok(Self { pool })
    }

    async fn load_chat(&self, chat_id: ChatId) -> StorageResult<Option<ChatRecord>> {
        let row = sqlx::query_as::<_, ChatRow>(
            "SELECT id, title, updated_at, deleted_at FROM chats WHERE id = ?",
        )
        .bind(chat_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(QuerySnafu {
            stage: "chat-get-query",
        })?;

        row.map(chat_row_to_record).transpose()
    }

    async fn mark_chat_deleted(&self, chat_id: ChatId) -> StorageResult<()> {
        let now = unix_timestamp_seconds();
        let result = sqlx::query(
            "UPDATE chats SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(chat_id.to_string())
        .execute(&self.pool)
        .await
        .context(QuerySnafu {
            stage: "chat-soft-delete",
        })?;

        ensure!(
            result.rows_affected() > 0,
            ChatNotFoundSnafu {
                stage: "chat-soft-delete-missing",
                chat_id,
            }
        );
        Ok(())
    }

    async fn insert_message(
        &self,
        chat_id: ChatId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord> {
        let content = input.content.trim().to_string();
        ensure!(
            !content.is_empty(),
            EmptyMessageSnafu {
                stage: "message-append-validate",
            }
        );
        let chars = content.chars().count();
        ensure!(
            chars <= MAX_MESSAGE_CHARS,
            MessageTooLongSnafu {
                stage: "message-append-validate",
                chars,
                max: MAX_MESSAGE_CHARS,
            }
        );

        let title_candidate = input.title_candidate();
        let now = unix_timestamp_seconds();
        let mut tx = self.pool.begin().await.context(QuerySnafu {
            stage: "message-append-begin",
        })?;

        let existing = sqlx::query_as::<_, ChatRow>(
            "SELECT id, title, updated_at, deleted_at FROM chats WHERE id = ?",
        )
        .bind(chat_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .context(QuerySnafu {
            stage: "message-append-load-chat",
        })?;

        match existing {
            Some(chat) => {
                ensure!(
                    chat.deleted_at.is_none(),
                    ChatDeletedSnafu {
                        stage: "message-append-chat-deleted",
                        chat_id,
                    }
                );
            }
            None => {
                sqlx::query(
                    "INSERT INTO chats (id, title, created_at, updated_at, deleted_at) VALUES (?, ?, ?, ?, NULL)",
                )
                .bind(chat_id.to_string())
                .bind(title_candidate.clone())
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context(QuerySnafu {
                    stage: "message-append-insert-chat",
                })?;
            }
        }

        let next_seq = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE chat_id = ?",
        )
        .bind(chat_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .context(QuerySnafu {
            stage: "message-append-next-seq",
        })?;

        let message_id = MessageId::new_v7();
        sqlx::query(
            "INSERT INTO messages (id, chat_id, seq, role, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message_id.to_string())
        .bind(chat_id.to_string())
        .bind(next_seq)
        .bind(role_to_sql(input.role))
        .bind(content.clone())
        .bind(now)
        .execute(&mut *tx)
        .await
        .context(QuerySnafu {
            stage: "message-append-insert",
        })?;

        // Only untitled chats pick up the candidate; existing titles are kept.
        sqlx::query(
            "UPDATE chats SET title = CASE WHEN title IS NULL OR title = '' THEN ? ELSE title END, updated_at = ? WHERE id = ?",
        )
        .bind(title_candidate)
        .bind(now)
        .bind(chat_id.to_string())
        .execute(&mut *tx)
        .await
        .context(QuerySnafu {
            stage: "message-append-touch-chat",
        })?;

        tx.commit().await.context(QuerySnafu {
            stage: "message-append-commit",
        })?;

        Ok(MessageRecord {
            id: message_id,
            chat_id,
            seq: i64_to_u64(next_seq, "message-append-seq")?,
            role: input.role,
            content,
            created_at_unix_seconds: i64_to_u64(now, "message-append-created-at")?,
        })
    }

    async fn load_messages(&self, chat_id: ChatId) -> StorageResult<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, chat_id, seq, role, content, created_at FROM messages WHERE chat_id = ? ORDER BY seq ASC, id ASC",
        )
        .bind(chat_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context(QuerySnafu {
            stage: "message-list-query",
        })?;

        rows.into_iter().map(message_row_to_record).collect()
    }
}

impl ChatStore for SqliteStorage {
    fn get_chat(&self, chat_id: ChatId) -> BoxFuture<'_, StorageResult<Option<ChatRecord>>> {
        Box::pin(self.load_chat(chat_id))
    }

    fn soft_delete_chat(&self, chat_id: ChatId) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(self.mark_chat_deleted(chat_id))
    }
}

impl MessageStore for SqliteStorage {
    fn append_message(
        &self,
        chat_id: ChatId,
        input: NewMessage,
    ) -> BoxFuture<'_, StorageResult<MessageRecord>> {
        Box::pin(self.insert_message(chat_id, input))
    }

    fn list_messages(&self, chat_id: ChatId) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>> {
        Box::pin(self.load_messages(chat_id))
    }
}

#[derive(Debug, FromRow)]
struct ChatRow {
    id: String,
    title: Option<String>,
    updated_at: i64,
    deleted_at: Option<i64>,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    chat_id: String,
    seq: i64,
    role: String,
    content: String,
    created_at: i64,
}

fn chat_row_to_record(row: ChatRow) -> StorageResult<ChatRecord> {
    Ok(ChatRecord {
        id: ChatId::parse(&row.id)?,
        title: row.title.filter(|title| !title.is_empty()),
        updated_at_unix_seconds: i64_to_u64(row.updated_at, "chat-row-updated-at")?,
        deleted_at_unix_seconds: row
            .deleted_at
            .map(|value| i64_to_u64(value, "chat-row-deleted-at"))
            .transpose()?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        chat_id: ChatId::parse(&row.chat_id)?,
        seq: i64_to_u64(row.seq, "message-row-seq")?,
        role: role_from_sql(&row.role)?,
        content: row.content,
        created_at_unix_seconds: i64_to_u64(row.created_at, "message-row-created-at")?,
    })
}

fn role_to_sql(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        _ => CorruptRowSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::CorruptRow {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateDatabaseDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
