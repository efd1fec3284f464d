use std::collections::HashSet;

use async_trait::async_trait;

use crate::models::integration::Integration;
use crate::models::label::Label;
use crate::models::post::PostToEnqueue;

/// Where posts and their labels live.
///
/// Two variants exist behind this seam: the local SQLite store and the S3
/// object store. An adapter may leave a method unimplemented, but must say so
/// with an explicit error, never a silent no-op.
#[async_trait]
pub trait DataRepository: Send + Sync {
    /// Load all preprocessed posts with a partition date in
    /// `[start_date, end_date]` (inclusive, YYYY-MM-DD). No matching rows is
    /// an empty vec, not an error.
    async fn load_posts(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<PostToEnqueue>, AdapterError>;

    /// URIs of posts that were actually surfaced to users in feeds within
    /// `[start_date, end_date]`.
    async fn load_feed_post_uris(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<HashSet<String>, AdapterError>;

    /// Union of the `cache` and `active` label tiers for `integration`,
    /// deduplicated. A read failure is an error; treating it as "nothing
    /// labeled" would re-enqueue already-labeled records and burn classifier
    /// quota.
    async fn load_previously_labeled_ids(
        &self,
        integration: Integration,
        id_field: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<HashSet<String>, AdapterError>;

    /// Commit labels to permanent storage for `integration`. No partial-write
    /// recovery; the caller is responsible for not double-committing.
    async fn write_records(
        &self,
        integration: Integration,
        records: &[Label],
    ) -> Result<(), AdapterError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("repository database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("object storage error: {0}")]
    ObjectStorage(String),

    #[error("record serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0} is not implemented for this adapter")]
    NotImplemented(&'static str),
}
