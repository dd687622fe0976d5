//! SQLite exchange store.
//!
//! Uses a single SQLite database file with two tables:
//! - `embedding_model`: at most one row, the model every embedding in the
//!   file was produced with
//! - `messages`: one row per stored exchange, in insertion order
//!
//! Triggers reject UPDATE and DELETE on both tables, so stored history can
//! only grow. No update or delete method exists.

use crate::exchange::{EmbeddingModelPin, ExchangeRecord};
use chatrecall_core::error::MemoryError;
use chatrecall_core::message::{Message, MessageExchange};
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

const IMMUTABLE_MESSAGE: &str = "modification not allowed";

/// Append-only store of message exchanges and their embeddings.
pub struct ExchangeStore {
    pool: SqlitePool,
    /// The embedding model this handle writes with.
    embedding_model: String,
    location: String,
}

impl ExchangeStore {
    /// Open (or create) a store file bound to `embedding_model`.
    ///
    /// Opening never touches the pin; a mismatch surfaces on
    /// [`ensure_compatible`](Self::ensure_compatible) or on insert.
    pub async fn open(
        path: impl AsRef<Path>,
        embedding_model: impl Into<String>,
    ) -> Result<Self, MemoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        Self::connect(options, path.display().to_string(), embedding_model.into()).await
    }

    /// Open an in-process ephemeral store (useful for tests).
    pub async fn in_memory(embedding_model: impl Into<String>) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?;
        Self::connect(options, ":memory:".into(), embedding_model.into()).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        location: String,
        embedding_model: String,
    ) -> Result<Self, MemoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self {
            pool,
            embedding_model,
            location,
        };
        store.run_migrations().await?;
        info!(
            store = %store.location,
            embedding_model = %store.embedding_model,
            "Exchange store initialized"
        );
        Ok(store)
    }

    /// Run schema migrations: creates tables and immutability triggers.
    async fn run_migrations(&self) -> Result<(), MemoryError> {
        // The CHECK on `id` makes a second pin row impossible.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_model (
                id                INTEGER PRIMARY KEY CHECK (id = 1),
                created_timestamp INTEGER NOT NULL,
                embedding_model   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("embedding_model table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp        INTEGER NOT NULL,
                chat_model       TEXT NOT NULL,
                message_exchange TEXT NOT NULL,
                embedding        BLOB
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("messages table: {e}")))?;

        for table in ["embedding_model", "messages"] {
            for event in ["UPDATE", "DELETE"] {
                let name = format!("prevent_{table}_{}", event.to_lowercase());
                let sql = format!(
                    "CREATE TRIGGER IF NOT EXISTS {name} BEFORE {event} ON {table} \
                     BEGIN SELECT RAISE(ABORT, '{IMMUTABLE_MESSAGE}'); END"
                );
                sqlx::query(&sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| MemoryError::MigrationFailed(format!("{name} trigger: {e}")))?;
            }
        }

        debug!("Exchange store migrations complete");
        Ok(())
    }

    /// The embedding model this handle was opened with.
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Where this store lives (file path or `:memory:`).
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The pinned embedding model, or `None` if nothing was ever stored.
    pub async fn get_embedding_model(&self) -> Result<Option<String>, MemoryError> {
        Ok(self.pin().await?.map(|pin| pin.embedding_model))
    }

    /// The full pin row, if one exists.
    pub async fn pin(&self) -> Result<Option<EmbeddingModelPin>, MemoryError> {
        let row = sqlx::query(
            "SELECT created_timestamp, embedding_model FROM embedding_model WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Pin lookup: {e}")))?;

        row.map(|r| {
            Ok(EmbeddingModelPin {
                created_at: column(&r, "created_timestamp")?,
                embedding_model: column(&r, "embedding_model")?,
            })
        })
        .transpose()
    }

    /// Fail with `EmbeddingModelMismatch` if the store is pinned to another
    /// model. Callers run this before making any billed request.
    pub async fn ensure_compatible(&self) -> Result<(), MemoryError> {
        match self.get_embedding_model().await? {
            Some(pinned) if pinned != self.embedding_model => {
                Err(MemoryError::EmbeddingModelMismatch {
                    pinned,
                    configured: self.embedding_model.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Append one exchange and return its storage id.
    ///
    /// Pins the store to this handle's embedding model on first write.
    /// The pin check, pin creation and row insert share one transaction,
    /// so a mismatch leaves the store untouched.
    pub async fn insert_exchange(
        &self,
        chat_model: &str,
        message_exchange: &[Message],
        embedding: Option<&[f32]>,
    ) -> Result<i64, MemoryError> {
        let exchange_json = serde_json::to_string(message_exchange)
            .map_err(|e| MemoryError::Storage(format!("Exchange serialization: {e}")))?;
        let embedding_blob: Option<Vec<u8>> = embedding.map(embedding_to_blob);
        let timestamp = Utc::now().timestamp();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("BEGIN failed: {e}")))?;

        let pinned: Option<String> =
            sqlx::query_scalar("SELECT embedding_model FROM embedding_model WHERE id = 1")
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| MemoryError::QueryFailed(format!("Pin lookup: {e}")))?;

        match pinned {
            None => {
                sqlx::query(
                    "INSERT INTO embedding_model (id, created_timestamp, embedding_model) \
                     VALUES (1, ?1, ?2)",
                )
                .bind(timestamp)
                .bind(&self.embedding_model)
                .execute(&mut *tx)
                .await
                .map_err(|e| write_error(e, "Pin INSERT"))?;
                info!(embedding_model = %self.embedding_model, "Pinned exchange store embedding model");
            }
            Some(pinned) if pinned != self.embedding_model => {
                return Err(MemoryError::EmbeddingModelMismatch {
                    pinned,
                    configured: self.embedding_model.clone(),
                });
            }
            Some(_) => {}
        }

        let id = sqlx::query(
            r#"
            INSERT INTO messages (timestamp, chat_model, message_exchange, embedding)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(timestamp)
        .bind(chat_model)
        .bind(&exchange_json)
        .bind(embedding_blob.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, "INSERT"))?
        .last_insert_rowid();

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("COMMIT failed: {e}")))?;

        debug!(
            exchange_id = id,
            chat_model,
            messages = message_exchange.len(),
            dimensions = embedding.map_or(0, <[f32]>::len),
            "Stored exchange"
        );
        Ok(id)
    }

    /// Every stored exchange, in insertion order.
    ///
    /// Rows whose payload cannot be decoded are logged and skipped rather
    /// than handed to context selection.
    pub async fn load_all(&self) -> Result<Vec<ExchangeRecord>, MemoryError> {
        let rows = sqlx::query(
            "SELECT id, timestamp, chat_model, message_exchange, embedding \
             FROM messages ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Load history: {e}")))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = column(row, "id")?;
            match Self::row_to_record(row) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    warn!(exchange_id = id, %reason, "Skipping unreadable exchange");
                }
            }
        }
        Ok(records)
    }

    /// Number of stored exchanges.
    pub async fn count(&self) -> Result<usize, MemoryError> {
        let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT: {e}")))?;
        Ok(cnt as usize)
    }

    /// Decode one `messages` row, reporting any failure as a reason string
    /// so the caller can skip the row.
    fn row_to_record(row: &SqliteRow) -> Result<ExchangeRecord, String> {
        let id: i64 = row.try_get("id").map_err(|e| format!("id column: {e}"))?;
        let timestamp: i64 = row
            .try_get("timestamp")
            .map_err(|e| format!("timestamp column: {e}"))?;
        let chat_model: String = row
            .try_get("chat_model")
            .map_err(|e| format!("chat_model column: {e}"))?;
        let exchange_json: String = row
            .try_get("message_exchange")
            .map_err(|e| format!("message_exchange column: {e}"))?;
        let blob: Option<Vec<u8>> = row
            .try_get("embedding")
            .map_err(|e| format!("embedding column: {e}"))?;

        let message_exchange: MessageExchange = serde_json::from_str(&exchange_json)
            .map_err(|e| format!("malformed exchange: {e}"))?;
        let embedding = match blob {
            Some(bytes) => blob_to_embedding(&bytes)?,
            None => Vec::new(),
        };

        Ok(ExchangeRecord {
            id,
            timestamp,
            chat_model,
            message_exchange,
            embedding,
        })
    }
}

/// Serialize an embedding vector to little-endian bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>, String> {
    if blob.len() % 4 != 0 {
        return Err(format!("malformed embedding: {} bytes", blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn write_error(e: sqlx::Error, op: &str) -> MemoryError {
    match &e {
        sqlx::Error::Database(db) if db.message().contains(IMMUTABLE_MESSAGE) => {
            MemoryError::ImmutableRecord(format!("{op} rejected"))
        }
        _ => MemoryError::Storage(format!("{op} failed: {e}")),
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, MemoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| MemoryError::QueryFailed(format!("{name} column: {e}")))
}
