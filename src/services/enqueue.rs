use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::db::repository::{AdapterError, DataRepository};
use crate::models::integration::Integration;
use crate::models::post::PostToEnqueue;
use crate::services::queue::{QueueError, QueueManager};

/// Which candidate loader feeds the enqueue pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// Every preprocessed post in the date range.
    Posts,
    /// Posts that were actually surfaced in a feed in the date range. The
    /// candidate pool is widened backwards by the lookback window, because a
    /// feed served on day D can contain posts preprocessed days earlier.
    PostsUsedInFeeds,
}

/// Per-integration counts for one enqueue pass.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationEnqueueCounts {
    pub integration: Integration,
    pub candidates: usize,
    pub skipped_already_labeled: usize,
    pub skipped_invalid: usize,
    pub enqueued: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnqueueSummary {
    pub counts: Vec<IntegrationEnqueueCounts>,
}

impl EnqueueSummary {
    pub fn total_enqueued(&self) -> u64 {
        self.counts.iter().map(|c| c.enqueued).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("repository error while loading candidates: {0}")]
    Adapter(#[from] AdapterError),

    #[error("queue error while enqueueing: {0}")]
    Queue(#[from] QueueError),

    #[error("invalid date '{value}': expected YYYY-MM-DD")]
    InvalidDate { value: String },
}

/// Loads candidate records and fills each integration's input queue with the
/// ones that still need labels.
pub struct EnqueueService<'a> {
    repository: &'a dyn DataRepository,
    queues: &'a QueueManager,
    feed_lookback_days: i64,
}

impl<'a> EnqueueService<'a> {
    pub fn new(
        repository: &'a dyn DataRepository,
        queues: &'a QueueManager,
        feed_lookback_days: i64,
    ) -> Self {
        Self {
            repository,
            queues,
            feed_lookback_days,
        }
    }

    /// Enqueue unlabeled candidates in `[start_date, end_date]` for each
    /// integration, strictly in order. Candidates are loaded once and shared.
    /// The first failure aborts the call; earlier integrations' enqueues are
    /// not rolled back.
    pub async fn enqueue(
        &self,
        record_type: RecordType,
        integrations: &[Integration],
        start_date: &str,
        end_date: &str,
    ) -> Result<EnqueueSummary, EnqueueError> {
        let candidates = self
            .load_candidates(record_type, start_date, end_date)
            .await?;
        tracing::info!(
            record_type = ?record_type,
            start_date,
            end_date,
            candidates = candidates.len(),
            "Loaded enqueue candidates"
        );

        let mut summary = EnqueueSummary::default();
        for &integration in integrations {
            let counts = self
                .enqueue_for_integration(
                    integration,
                    &candidates,
                    record_type,
                    start_date,
                    end_date,
                )
                .await?;
            summary.counts.push(counts);
        }
        Ok(summary)
    }

    async fn load_candidates(
        &self,
        record_type: RecordType,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<PostToEnqueue>, EnqueueError> {
        match record_type {
            RecordType::Posts => Ok(self.repository.load_posts(start_date, end_date).await?),
            RecordType::PostsUsedInFeeds => {
                let lookback_start = subtract_days(start_date, self.feed_lookback_days)?;
                let posts = self
                    .repository
                    .load_posts(&lookback_start, end_date)
                    .await?;
                let feed_uris = self
                    .repository
                    .load_feed_post_uris(start_date, end_date)
                    .await?;
                Ok(posts
                    .into_iter()
                    .filter(|post| feed_uris.contains(&post.uri))
                    .collect())
            }
        }
    }

    async fn enqueue_for_integration(
        &self,
        integration: Integration,
        candidates: &[PostToEnqueue],
        record_type: RecordType,
        start_date: &str,
        end_date: &str,
    ) -> Result<IntegrationEnqueueCounts, EnqueueError> {
        let labeled: HashSet<String> = self
            .repository
            .load_previously_labeled_ids(integration, integration.id_field(), start_date, end_date)
            .await?;

        let mut skipped_invalid = 0usize;
        let mut to_enqueue: Vec<&PostToEnqueue> = Vec::new();
        for post in candidates {
            if labeled.contains(&post.uri) {
                continue;
            }
            if let Err(e) = post.validate() {
                tracing::warn!(uri = %post.uri, error = %e, "Skipping invalid candidate");
                skipped_invalid += 1;
                continue;
            }
            to_enqueue.push(post);
        }
        let skipped_already_labeled = candidates.len() - to_enqueue.len() - skipped_invalid;

        let metadata = serde_json::json!({
            "record_type": record_type,
            "start_date": start_date,
            "end_date": end_date,
        });
        let queue = self.queues.input(integration).await?;
        let enqueued = queue.enqueue(&to_enqueue, Some(&metadata)).await?;
        metrics::counter!("backfill_enqueued_total", "integration" => integration.to_string())
            .increment(enqueued);

        tracing::info!(
            integration = %integration,
            candidates = candidates.len(),
            skipped_already_labeled,
            skipped_invalid,
            enqueued,
            "Enqueued records for integration"
        );

        Ok(IntegrationEnqueueCounts {
            integration,
            candidates: candidates.len(),
            skipped_already_labeled,
            skipped_invalid,
            enqueued,
        })
    }
}

fn subtract_days(date: &str, days: i64) -> Result<String, EnqueueError> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
        EnqueueError::InvalidDate {
            value: date.to_string(),
        }
    })?;
    Ok((parsed - Duration::days(days)).format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtract_days_crosses_month_boundary() {
        assert_eq!(subtract_days("2024-10-03", 5).unwrap(), "2024-09-28");
    }

    #[test]
    fn test_subtract_days_rejects_malformed_date() {
        assert!(matches!(
            subtract_days("10/03/2024", 5),
            Err(EnqueueError::InvalidDate { .. })
        ));
    }
}
