use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Pool, QueryBuilder, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

use shared::{
    domain::{Destination, Message, MessageDraft, MessageId},
    error::ValidationError,
};

const MESSAGE_COLUMNS: &str =
    "id, sender, body, media, room, receiver, created_at_ms, scheduled_for_ms";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("message {0} not found")]
    NotFound(MessageId),
    #[error("message store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivered,
    Seen,
}

impl ReceiptKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }
}

#[derive(Default)]
struct Receipts {
    delivered_to: Vec<String>,
    seen_by: Vec<String>,
}

/// Durable message log. Messages are appended by [`Storage::persist`] and
/// afterwards only gain receipts; nothing here deletes a message.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let in_memory = is_in_memory(database_url);
        let mut connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        // an in-memory database lives and dies with its connection
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to apply message store migrations")?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Validates and stores a draft. `created_at` is the logical persistence
    /// time: `now` for an immediate send, the deadline for a deferred one.
    /// Text fields are stored trimmed. The sender is recorded as the first
    /// `deliveredTo` entry.
    pub async fn persist(
        &self,
        draft: &MessageDraft,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Message> {
        let draft = draft.normalized();
        draft.validate()?;

        let created_at_ms = created_at.timestamp_millis();
        let scheduled_for_ms = draft.scheduled_for.map(|at| at.timestamp_millis());

        let mut tx = self.pool.begin().await?;
        let rec = sqlx::query(
            "INSERT INTO messages (sender, body, media, room, receiver, created_at_ms, scheduled_for_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&draft.sender)
        .bind(&draft.body)
        .bind(draft.media.as_deref())
        .bind(draft.destination.room_name())
        .bind(draft.destination.receiver())
        .bind(created_at_ms)
        .bind(scheduled_for_ms)
        .fetch_one(&mut *tx)
        .await?;
        let id = MessageId(rec.get::<i64, _>(0));

        sqlx::query(
            "INSERT INTO message_receipts (message_id, kind, identity, recorded_at_ms)
             VALUES (?, ?, ?, ?)",
        )
        .bind(id.0)
        .bind(ReceiptKind::Delivered.as_str())
        .bind(&draft.sender)
        .bind(created_at_ms)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(message_id = %id, sender = %draft.sender, "message persisted");
        Ok(Message {
            id,
            sender: draft.sender.clone(),
            body: draft.body.clone(),
            media: draft.media.clone(),
            destination: draft.destination.clone(),
            created_at: from_millis(created_at_ms),
            scheduled_for: scheduled_for_ms.map(from_millis),
            delivered_to: vec![draft.sender.clone()],
            seen_by: Vec::new(),
        })
    }

    pub async fn find_by_id(&self, id: MessageId) -> StoreResult<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.hydrate(vec![row]).await?.pop())
    }

    /// Room history, oldest first.
    pub async fn find_by_room(&self, room: &str) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE room = ?
             ORDER BY created_at_ms ASC, id ASC"
        ))
        .bind(room)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    /// Direct messages between `a` and `b` in both directions, oldest first.
    pub async fn find_conversation(&self, a: &str, b: &str) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
             ORDER BY created_at_ms ASC, id ASC"
        ))
        .bind(a)
        .bind(b)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    pub async fn mark_delivered(&self, id: MessageId, identity: &str) -> StoreResult<Message> {
        self.mark_receipt(id, identity, ReceiptKind::Delivered).await
    }

    pub async fn mark_seen(&self, id: MessageId, identity: &str) -> StoreResult<Message> {
        self.mark_receipt(id, identity, ReceiptKind::Seen).await
    }

    /// Add-to-set on the receipt table. The primary key on
    /// (message_id, kind, identity) makes concurrent receipts safe and
    /// repeated receipts no-ops. Receipts from the sender are ignored.
    pub async fn mark_receipt(
        &self,
        id: MessageId,
        identity: &str,
        kind: ReceiptKind,
    ) -> StoreResult<Message> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(ValidationError::EmptyIdentity.into());
        }

        let sender: Option<String> = sqlx::query_scalar("SELECT sender FROM messages WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        let Some(sender) = sender else {
            return Err(StoreError::NotFound(id));
        };

        if sender == identity {
            debug!(message_id = %id, identity, kind = kind.as_str(), "ignoring receipt from sender");
        } else {
            let result = sqlx::query(
                "INSERT INTO message_receipts (message_id, kind, identity, recorded_at_ms)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(message_id, kind, identity) DO NOTHING",
            )
            .bind(id.0)
            .bind(kind.as_str())
            .bind(identity)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                debug!(message_id = %id, identity, kind = kind.as_str(), "receipt already recorded");
            }
        }

        self.find_by_id(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> StoreResult<Vec<Message>> {
        let ids: Vec<MessageId> = rows
            .iter()
            .map(|r| MessageId(r.get::<i64, _>("id")))
            .collect();
        let mut receipts = self.load_receipts(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let id = MessageId(r.get::<i64, _>("id"));
                let destination = match r.get::<Option<String>, _>("room") {
                    Some(room) => Destination::Room { room },
                    None => Destination::Direct {
                        receiver: r.get::<Option<String>, _>("receiver").unwrap_or_default(),
                    },
                };
                let Receipts {
                    delivered_to,
                    seen_by,
                } = receipts.remove(&id).unwrap_or_default();
                Message {
                    id,
                    sender: r.get::<String, _>("sender"),
                    body: r.get::<String, _>("body"),
                    media: r.get::<Option<String>, _>("media"),
                    destination,
                    created_at: from_millis(r.get::<i64, _>("created_at_ms")),
                    scheduled_for: r.get::<Option<i64>, _>("scheduled_for_ms").map(from_millis),
                    delivered_to,
                    seen_by,
                }
            })
            .collect())
    }

    async fn load_receipts(&self, ids: &[MessageId]) -> StoreResult<HashMap<MessageId, Receipts>> {
        let mut receipts: HashMap<MessageId, Receipts> = HashMap::new();
        if ids.is_empty() {
            return Ok(receipts);
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, kind, identity FROM message_receipts WHERE message_id IN (",
        );
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.0);
        }
        separated.push_unseparated(") ORDER BY recorded_at_ms ASC, rowid ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        for row in rows {
            let entry = receipts
                .entry(MessageId(row.get::<i64, _>(0)))
                .or_default();
            let identity = row.get::<String, _>(2);
            match row.get::<String, _>(1).as_str() {
                "seen" => entry.seen_by.push(identity),
                _ => entry.delivered_to.push(identity),
            }
        }
        Ok(receipts)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

pub fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;
    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_in_memory(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
