use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::models::integration::Integration;
use crate::models::label::current_timestamp_str;

/// Rows inserted or deleted per multi-row statement.
const STATEMENT_CHUNK_SIZE: usize = 500;

/// A durable FIFO-ish queue backed by its own SQLite file.
///
/// One logical queue per integration direction (`input_<integration>` /
/// `output_<integration>`), each with its own database so queues scale
/// independently. Row ids are the only handle for deletion; rows are never
/// updated in place.
///
/// Single-writer: concurrent processes against the same queue file are
/// unsupported and can produce duplicate work.
pub struct Queue {
    name: String,
    pool: SqlitePool,
}

/// A row loaded from a queue, with its payload deserialized.
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    /// Queue-assigned row id, unique within this logical queue.
    pub id: i64,
    pub payload: T,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

impl Queue {
    /// Open (creating if missing) the queue named `name` under `dir`.
    pub async fn open(dir: &Path, name: &str) -> Result<Self, QueueError> {
        let db_path: PathBuf = dir.join(format!("{name}.db"));
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(QueueError::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(QueueError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(Self {
            name: name.to_string(),
            pool,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append items to the queue, one row per item. All rows share the same
    /// optional metadata blob. Returns the number of rows inserted.
    pub async fn enqueue<T: Serialize>(
        &self,
        items: &[T],
        metadata: Option<&serde_json::Value>,
    ) -> Result<u64, QueueError> {
        if items.is_empty() {
            return Ok(0);
        }

        let metadata_json = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(QueueError::Serialize)?;
        let created_at = current_timestamp_str();

        let mut inserted: u64 = 0;
        for chunk in items.chunks(STATEMENT_CHUNK_SIZE) {
            let payloads = chunk
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<String>, _>>()
                .map_err(QueueError::Serialize)?;

            let mut builder = sqlx::QueryBuilder::new(
                "INSERT INTO queue (payload, metadata, created_at, status) ",
            );
            builder.push_values(payloads, |mut b, payload| {
                b.push_bind(payload)
                    .push_bind(metadata_json.clone())
                    .push_bind(created_at.clone())
                    .push_bind("pending");
            });

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(QueueError::Database)?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    /// Load every item in the queue, in id order. Does not consume rows.
    pub async fn load_all<T: DeserializeOwned>(&self) -> Result<Vec<QueueItem<T>>, QueueError> {
        let rows =
            sqlx::query("SELECT id, payload, metadata, created_at FROM queue ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(QueueError::Database)?;

        rows.into_iter()
            .map(|row| {
                let id: i64 = row.try_get("id").map_err(QueueError::Database)?;
                let payload: String = row.try_get("payload").map_err(QueueError::Database)?;
                let metadata: Option<String> =
                    row.try_get("metadata").map_err(QueueError::Database)?;
                let created_at: String =
                    row.try_get("created_at").map_err(QueueError::Database)?;

                let payload: T = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                let metadata = metadata
                    .filter(|m| !m.is_empty())
                    .map(|m| serde_json::from_str(&m))
                    .transpose()
                    .map_err(QueueError::Serialize)?;

                Ok(QueueItem {
                    id,
                    payload,
                    metadata,
                    created_at,
                })
            })
            .collect()
    }

    /// Load just the row ids. Cheapest way to address the queue for deletion;
    /// no payload deserialization.
    pub async fn load_ids(&self) -> Result<Vec<i64>, QueueError> {
        let rows = sqlx::query("SELECT id FROM queue ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::Database)?;
        rows.into_iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(QueueError::Database))
            .collect()
    }

    /// Delete rows by id. Returns the number of rows actually deleted.
    pub async fn delete_by_ids(&self, ids: &[i64]) -> Result<u64, QueueError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut deleted: u64 = 0;
        for chunk in ids.chunks(STATEMENT_CHUNK_SIZE) {
            let mut builder = sqlx::QueryBuilder::new("DELETE FROM queue WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(QueueError::Database)?;
            deleted += result.rows_affected();
        }

        Ok(deleted)
    }

    /// Delete every row. Returns the number of rows deleted.
    pub async fn clear(&self) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM queue")
            .execute(&self.pool)
            .await
            .map_err(QueueError::Database)?;
        Ok(result.rows_affected())
    }

    /// Current number of rows in the queue.
    pub async fn len(&self) -> Result<u64, QueueError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM queue")
            .fetch_one(&self.pool)
            .await
            .map_err(QueueError::Database)?;
        let n: i64 = row.try_get("n").map_err(QueueError::Database)?;
        Ok(n as u64)
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}

/// Opens queues on demand and caches the handles by name, so every caller
/// in a run shares one pool per queue file.
pub struct QueueManager {
    dir: PathBuf,
    queues: Mutex<HashMap<String, Arc<Queue>>>,
}

impl QueueManager {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, name: &str) -> Result<Arc<Queue>, QueueError> {
        let mut queues = self.queues.lock().await;
        if let Some(queue) = queues.get(name) {
            return Ok(Arc::clone(queue));
        }
        let queue = Arc::new(Queue::open(&self.dir, name).await?);
        queues.insert(name.to_string(), Arc::clone(&queue));
        Ok(queue)
    }

    /// Queue of records waiting to be classified for `integration`.
    pub async fn input(&self, integration: Integration) -> Result<Arc<Queue>, QueueError> {
        self.get(&integration.input_queue_name()).await
    }

    /// Queue of labels waiting to be committed for `integration`.
    pub async fn output(&self, integration: Integration) -> Result<Arc<Queue>, QueueError> {
        self.get(&integration.output_queue_name()).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue payload serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("queue storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
