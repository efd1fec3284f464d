use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use strum::IntoEnumIterator;

use crate::db::repository::{AdapterError, DataRepository};
use crate::models::integration::Integration;
use crate::models::label::Label;
use crate::models::post::PostToEnqueue;

/// Local filesystem repository backed by a single SQLite database.
///
/// Labels live in two physical tiers per integration:
/// `<integration>_cache` (committed by the cache buffer writer) and
/// `<integration>_active` (written by the live firehose pipeline). Readers
/// union both tiers; `write_records` only ever appends to the cache tier.
pub struct LocalStorageRepository {
    pool: SqlitePool,
}

impl LocalStorageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create all tables this repository reads or writes. Idempotent.
    pub async fn init_schema(&self) -> Result<(), AdapterError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preprocessed_posts (
                uri TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                preprocessing_timestamp TEXT NOT NULL,
                partition_date TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_posts (
                uri TEXT NOT NULL,
                feed_date TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for integration in Integration::iter() {
            for tier in ["cache", "active"] {
                let ddl = format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {integration}_{tier} (
                        uri TEXT NOT NULL,
                        payload TEXT NOT NULL,
                        was_successfully_labeled INTEGER NOT NULL,
                        label_timestamp TEXT NOT NULL,
                        partition_date TEXT NOT NULL
                    )
                    "#
                );
                sqlx::query(&ddl).execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    /// Seed preprocessed posts (ingestion glue; also used by tests).
    pub async fn insert_posts(
        &self,
        posts: &[(PostToEnqueue, String)],
    ) -> Result<(), AdapterError> {
        for (post, partition_date) in posts {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO preprocessed_posts
                    (uri, text, preprocessing_timestamp, partition_date)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&post.uri)
            .bind(&post.text)
            .bind(&post.preprocessing_timestamp)
            .bind(partition_date)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Record that `uri` appeared in a feed served on `feed_date`.
    pub async fn insert_feed_posts(
        &self,
        entries: &[(String, String)],
    ) -> Result<(), AdapterError> {
        for (uri, feed_date) in entries {
            sqlx::query("INSERT INTO feed_posts (uri, feed_date) VALUES (?, ?)")
                .bind(uri)
                .bind(feed_date)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Seed the active tier directly (used by tests to model labels written
    /// by the live pipeline rather than by the cache writer).
    pub async fn insert_active_labels(
        &self,
        integration: Integration,
        records: &[Label],
    ) -> Result<(), AdapterError> {
        self.insert_labels(integration, "active", records).await
    }

    async fn insert_labels(
        &self,
        integration: Integration,
        tier: &str,
        records: &[Label],
    ) -> Result<(), AdapterError> {
        let sql = format!(
            r#"
            INSERT INTO {integration}_{tier}
                (uri, payload, was_successfully_labeled, label_timestamp, partition_date)
            VALUES (?, ?, ?, ?, ?)
            "#
        );
        for record in records {
            let payload = serde_json::to_string(record)?;
            // label_timestamp is YYYY-MM-DD-HH:MM:SS; the partition date is
            // its date prefix.
            let partition_date: String = record.label_timestamp.chars().take(10).collect();
            sqlx::query(&sql)
                .bind(&record.uri)
                .bind(&payload)
                .bind(record.was_successfully_labeled)
                .bind(&record.label_timestamp)
                .bind(&partition_date)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn load_tier_ids(
        &self,
        integration: Integration,
        tier: &str,
        id_field: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<HashSet<String>, AdapterError> {
        let sql = format!(
            "SELECT {id_field} FROM {integration}_{tier} WHERE partition_date BETWEEN ? AND ?"
        );
        let rows = sqlx::query(&sql)
            .bind(start_date)
            .bind(end_date)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>(0).map_err(AdapterError::Database))
            .collect()
    }
}

#[async_trait]
impl DataRepository for LocalStorageRepository {
    async fn load_posts(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<PostToEnqueue>, AdapterError> {
        let rows = sqlx::query(
            r#"
            SELECT uri, text, preprocessing_timestamp
            FROM preprocessed_posts
            WHERE text IS NOT NULL AND text != ''
              AND partition_date BETWEEN ? AND ?
            ORDER BY partition_date ASC, uri ASC
            "#,
        )
        .bind(start_date)
        .bind(end_date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PostToEnqueue {
                    uri: row.try_get("uri")?,
                    text: row.try_get("text")?,
                    preprocessing_timestamp: row.try_get("preprocessing_timestamp")?,
                })
            })
            .collect()
    }

    async fn load_feed_post_uris(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<HashSet<String>, AdapterError> {
        let rows = sqlx::query(
            "SELECT DISTINCT uri FROM feed_posts WHERE feed_date BETWEEN ? AND ?",
        )
        .bind(start_date)
        .bind(end_date)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("uri").map_err(AdapterError::Database))
            .collect()
    }

    async fn load_previously_labeled_ids(
        &self,
        integration: Integration,
        id_field: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<HashSet<String>, AdapterError> {
        let cached = self
            .load_tier_ids(integration, "cache", id_field, start_date, end_date)
            .await?;
        let active = self
            .load_tier_ids(integration, "active", id_field, start_date, end_date)
            .await?;

        tracing::info!(
            integration = %integration,
            cached = cached.len(),
            active = active.len(),
            "Loaded previously labeled ids from cache and active tiers"
        );

        let mut ids = cached;
        ids.extend(active);
        Ok(ids)
    }

    async fn write_records(
        &self,
        integration: Integration,
        records: &[Label],
    ) -> Result<(), AdapterError> {
        self.insert_labels(integration, "cache", records).await
    }
}
