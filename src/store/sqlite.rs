// sqlx/SQLite implementation of the store contract.
//
// The unordered-pair invariant lives in the schema: conversations carry the
// normalized pair in (pair_lo, pair_hi) under a UNIQUE constraint, so a lost
// creation race comes back as a unique violation instead of a second row.
// Uuids are bound as strings and timestamps stored as RFC 3339 text.

use chrono::{DateTime, Utc};
use log::info;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{Conversation, Message};
use crate::store::{fan_out, pair_key, ChatStore, StoreError, Subscription};

use async_trait::async_trait;

const FEED_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    /// Fan-out covers inserts made through this handle and its clones.
    tx: broadcast::Sender<String>,
}

type ConversationRow = (String, String, String, String, String);
type MessageRow = (String, String, String, String, String, bool);

impl SqliteStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                participant_a TEXT NOT NULL,
                participant_b TEXT NOT NULL,
                pair_lo TEXT NOT NULL,
                pair_hi TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (pair_lo, pair_hi)
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages (conversation_id, id)",
        )
        .execute(&pool)
        .await?;

        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Ok(SqliteStore { pool, tx })
    }

    /// Connect using the `DATABASE_URL` environment variable.
    pub async fn from_env() -> Result<Self, StoreError> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| StoreError::Unavailable("DATABASE_URL is not set".to_owned()))?;
        Self::connect(&url).await
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Decode(format!("bad uuid {s:?}: {e}")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("bad timestamp {s:?}: {e}")))
}

fn conversation_from_row(row: ConversationRow) -> Result<Conversation, StoreError> {
    let (id, participant_a, participant_b, created_at, updated_at) = row;
    Ok(Conversation {
        id: parse_uuid(&id)?,
        participant_a,
        participant_b,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn message_from_row(row: MessageRow) -> Result<Message, StoreError> {
    let (id, conversation_id, sender_id, content, created_at, read) = row;
    Ok(Message {
        id: parse_uuid(&id)?,
        conversation_id: parse_uuid(&conversation_id)?,
        sender_id,
        content,
        created_at: parse_timestamp(&created_at)?,
        read,
    })
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn find_conversation(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let (lo, hi) = pair_key(a, b);
        let row: Option<ConversationRow> = sqlx::query_as(
            "SELECT id, participant_a, participant_b, created_at, updated_at
                FROM conversations WHERE pair_lo = ? AND pair_hi = ?",
        )
        .bind(&lo)
        .bind(&hi)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn create_conversation(&self, a: &str, b: &str) -> Result<Conversation, StoreError> {
        let (lo, hi) = pair_key(a, b);
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::now_v7(),
            participant_a: a.to_owned(),
            participant_b: b.to_owned(),
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            "INSERT INTO conversations
                (id, participant_a, participant_b, pair_lo, pair_hi, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation.id.to_string())
        .bind(a)
        .bind(b)
        .bind(&lo)
        .bind(&hi)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!("created conversation {} for ({}, {})", conversation.id, a, b);
                Ok(conversation)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::PairConflict(a.to_owned(), b.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_conversations(
        &self,
        participant: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            "SELECT id, participant_a, participant_b, created_at, updated_at
                FROM conversations
                WHERE participant_a = ? OR participant_b = ?
                ORDER BY updated_at DESC, id DESC",
        )
        .bind(participant)
        .bind(participant)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(conversation_from_row).collect()
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM conversations WHERE id = ?")
            .bind(conversation_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::ConversationNotFound(conversation_id));
        }

        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, conversation_id, sender_id, content, created_at, read
                FROM messages WHERE conversation_id = ?
                ORDER BY created_at ASC, id ASC",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        sender: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT participant_a, participant_b FROM conversations WHERE id = ?",
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let (participant_a, participant_b) =
            row.ok_or(StoreError::ConversationNotFound(conversation_id))?;
        if sender != participant_a && sender != participant_b {
            return Err(StoreError::ForeignSender {
                sender: sender.to_owned(),
                conversation_id,
            });
        }

        let message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id: sender.to_owned(),
            content: content.to_owned(),
            created_at: Utc::now(),
            read: false,
        };

        let mut txn = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, content, created_at, read)
                VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(conversation_id.to_string())
        .bind(sender)
        .bind(content)
        .bind(message.created_at.to_rfc3339())
        .bind(message.read)
        .execute(&mut *txn)
        .await?;
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(message.created_at.to_rfc3339())
            .bind(conversation_id.to_string())
            .execute(&mut *txn)
            .await?;
        txn.commit().await?;

        fan_out(&self.tx, &message);
        Ok(message)
    }

    fn subscribe(&self, conversation_id: Uuid) -> Subscription {
        Subscription::new(conversation_id, self.tx.subscribe())
    }
}
