use std::collections::HashSet;

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::db::repository::{AdapterError, DataRepository};
use crate::models::integration::Integration;
use crate::models::label::{current_timestamp_str, Label};
use crate::models::post::PostToEnqueue;

/// Object-storage repository variant (S3-compatible).
///
/// Only the write path is wired up: committed labels are exported as
/// newline-delimited JSON objects. The read paths are served from the local
/// store; calling them here fails explicitly rather than pretending nothing
/// is labeled.
pub struct S3Repository {
    bucket: Box<Bucket>,
}

impl S3Repository {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, AdapterError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| AdapterError::ObjectStorage(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| AdapterError::ObjectStorage(e.to_string()))?;

        Ok(Self { bucket })
    }

    fn object_key(integration: Integration, partition_date: &str) -> String {
        format!(
            "{integration}/cache/{partition_date}/{}.jsonl",
            current_timestamp_str()
        )
    }
}

#[async_trait]
impl DataRepository for S3Repository {
    async fn load_posts(
        &self,
        _start_date: &str,
        _end_date: &str,
    ) -> Result<Vec<PostToEnqueue>, AdapterError> {
        Err(AdapterError::NotImplemented("load_posts"))
    }

    async fn load_feed_post_uris(
        &self,
        _start_date: &str,
        _end_date: &str,
    ) -> Result<HashSet<String>, AdapterError> {
        Err(AdapterError::NotImplemented("load_feed_post_uris"))
    }

    async fn load_previously_labeled_ids(
        &self,
        _integration: Integration,
        _id_field: &str,
        _start_date: &str,
        _end_date: &str,
    ) -> Result<HashSet<String>, AdapterError> {
        Err(AdapterError::NotImplemented("load_previously_labeled_ids"))
    }

    async fn write_records(
        &self,
        integration: Integration,
        records: &[Label],
    ) -> Result<(), AdapterError> {
        if records.is_empty() {
            return Ok(());
        }

        let partition_date: String = records[0].label_timestamp.chars().take(10).collect();
        let mut body = String::new();
        for record in records {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }

        let key = Self::object_key(integration, &partition_date);
        self.bucket
            .put_object_with_content_type(&key, body.as_bytes(), "application/x-ndjson")
            .await
            .map_err(|e| AdapterError::ObjectStorage(e.to_string()))?;

        tracing::info!(
            integration = %integration,
            key = %key,
            records = records.len(),
            "Exported labels to object storage"
        );
        Ok(())
    }
}
