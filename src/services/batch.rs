use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::models::integration::Integration;
use crate::models::label::{Label, LabelKind, LabelWithQueueId};
use crate::models::metadata::BatchRunMetadata;
use crate::models::post::{PostToEnqueue, QueuedPost};
use crate::services::classifiers::Classifier;
use crate::services::queue::{Queue, QueueError};

/// How failed records are resubmitted on a retry round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Resubmit every original batch that contains a failure, whole.
    /// Results for members that already succeeded are ignored.
    Batch,
    /// Re-batch only the failed records and resubmit those.
    Individual,
}

/// Knobs for one batch-classification invocation.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Records submitted to the classifier per call.
    pub batch_size: usize,
    /// Retry rounds after the initial attempt. The classifier sees at most
    /// `max_retries + 1` rounds.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles every round after.
    pub initial_delay: Duration,
    pub strategy: RetryStrategy,
}

impl BatchOptions {
    /// Per-integration defaults.
    pub fn for_integration(integration: Integration) -> Self {
        Self {
            batch_size: integration.default_batch_size(),
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            strategy: integration.default_retry_strategy(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("queue operation failed during batch run: {0}")]
    Queue(#[from] QueueError),
}

/// Classify `pending` with retries, committing results per round.
///
/// Rounds run strictly in sequence; the batches within a round are dispatched
/// concurrently. Each round's successes are appended to the output queue and
/// their input rows deleted before the next round starts, so a crash mid-run
/// loses at most the in-flight round. Classifier errors and length-mismatched
/// outputs mark the affected batch failed for the round; they are never
/// propagated. Records still unlabeled after the final round are returned to
/// the input queue as new rows carrying the failure reason.
pub async fn run_batch_classification(
    classifier: &dyn Classifier,
    integration: Integration,
    pending: Vec<QueuedPost>,
    input_queue: &Queue,
    output_queue: &Queue,
    options: &BatchOptions,
) -> Result<BatchRunMetadata, BatchError> {
    if pending.is_empty() {
        tracing::info!(integration = %integration, "No pending records, nothing to classify");
        return Ok(BatchRunMetadata::default());
    }

    let batch_size = options.batch_size.max(1);
    let mut labels: Vec<Option<Label>> = vec![None; pending.len()];

    // Index-based bookkeeping: batches are lists of indices into `pending`,
    // so the Batch strategy can resubmit the original groupings verbatim.
    let original_batches: Vec<Vec<usize>> = (0..pending.len())
        .collect::<Vec<usize>>()
        .chunks(batch_size)
        .map(<[usize]>::to_vec)
        .collect();
    let total_batches = original_batches.len();

    for round in 0..=options.max_retries {
        let round_batches: Vec<Vec<usize>> = if round == 0 {
            original_batches.clone()
        } else {
            match options.strategy {
                RetryStrategy::Individual => failed_indices(&labels)
                    .chunks(batch_size)
                    .map(<[usize]>::to_vec)
                    .collect(),
                RetryStrategy::Batch => original_batches
                    .iter()
                    .filter(|batch| batch.iter().any(|&i| labels[i].is_none()))
                    .cloned()
                    .collect(),
            }
        };

        let dispatches = round_batches.iter().map(|indices| {
            let batch: Vec<PostToEnqueue> =
                indices.iter().map(|&i| pending[i].post.clone()).collect();
            async move { classify_one_batch(classifier, integration, &batch).await }
        });
        let results = join_all(dispatches).await;
        metrics::counter!("backfill_classify_calls_total", "integration" => integration.to_string())
            .increment(round_batches.len() as u64);

        let mut round_successes: Vec<LabelWithQueueId> = Vec::new();
        for (indices, batch_labels) in round_batches.iter().zip(results) {
            for (&i, slot) in indices.iter().zip(batch_labels) {
                // Batch strategy resubmits already-succeeded members; keep
                // the first result.
                if labels[i].is_some() {
                    continue;
                }
                if let Some(label) = slot {
                    round_successes.push(LabelWithQueueId {
                        queue_id: pending[i].queue_id,
                        label: label.clone(),
                    });
                    labels[i] = Some(label);
                }
            }
        }

        if !round_successes.is_empty() {
            output_queue.enqueue(&round_successes, None).await?;
            let succeeded_ids: Vec<i64> =
                round_successes.iter().map(|l| l.queue_id).collect();
            input_queue.delete_by_ids(&succeeded_ids).await?;
            metrics::counter!("backfill_labels_succeeded_total", "integration" => integration.to_string())
                .increment(round_successes.len() as u64);
        }

        let succeeded_so_far = labels.iter().filter(|l| l.is_some()).count();
        let still_failed = pending.len() - succeeded_so_far;
        tracing::info!(
            integration = %integration,
            round,
            batches = round_batches.len(),
            succeeded = succeeded_so_far,
            failed = still_failed,
            "Completed classification round"
        );

        if still_failed == 0 {
            break;
        }
        if round < options.max_retries {
            tokio::time::sleep(backoff_delay(options.initial_delay, round)).await;
        }
    }

    let terminal = failed_indices(&labels);
    if !terminal.is_empty() {
        let reason = format!("failed_label_{integration}");
        let failed_labels: Vec<Label> = terminal
            .iter()
            .map(|&i| {
                Label::failed(&pending[i].post, empty_kind(integration), reason.clone())
            })
            .collect();

        // Re-enqueue as new rows first, then drop the superseded originals.
        // A crash in between leaves duplicates, never lost records.
        let metadata = serde_json::json!({ "reason": reason });
        input_queue.enqueue(&failed_labels, Some(&metadata)).await?;
        let superseded: Vec<i64> = terminal.iter().map(|&i| pending[i].queue_id).collect();
        input_queue.delete_by_ids(&superseded).await?;
        metrics::counter!("backfill_labels_failed_total", "integration" => integration.to_string())
            .increment(terminal.len() as u64);
    }

    let metadata = BatchRunMetadata {
        total_batches,
        total_successfully_labeled: pending.len() - terminal.len(),
        total_failed: terminal.len(),
    };
    tracing::info!(
        integration = %integration,
        total_batches = metadata.total_batches,
        succeeded = metadata.total_successfully_labeled,
        failed = metadata.total_failed,
        max_retries = options.max_retries,
        "Batch classification finished"
    );
    Ok(metadata)
}

/// Backoff never grows past this, however large the retry budget or the
/// configured initial delay.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// `initial * 2^round`, saturating instead of overflowing and capped at
/// [`MAX_BACKOFF`].
fn backoff_delay(initial: Duration, round: u32) -> Duration {
    let factor = 1u32.checked_shl(round).unwrap_or(u32::MAX);
    initial.saturating_mul(factor).min(MAX_BACKOFF)
}

fn failed_indices(labels: &[Option<Label>]) -> Vec<usize> {
    labels
        .iter()
        .enumerate()
        .filter_map(|(i, l)| l.is_none().then_some(i))
        .collect()
}

/// Run one batch through the classifier, degrading every failure mode to
/// per-record `None` so the round can continue.
async fn classify_one_batch(
    classifier: &dyn Classifier,
    integration: Integration,
    batch: &[PostToEnqueue],
) -> Vec<Option<Label>> {
    match classifier.classify(batch).await {
        Ok(results) if results.len() == batch.len() => results,
        Ok(results) => {
            tracing::warn!(
                integration = %integration,
                expected = batch.len(),
                got = results.len(),
                "Classifier output length mismatch, failing batch for this round"
            );
            vec![None; batch.len()]
        }
        Err(e) => {
            tracing::warn!(
                integration = %integration,
                error = %e,
                "Classifier call failed, failing batch for this round"
            );
            vec![None; batch.len()]
        }
    }
}

/// The all-`None` payload attached to a terminal failure record.
fn empty_kind(integration: Integration) -> LabelKind {
    match integration {
        Integration::PerspectiveApi => LabelKind::Perspective {
            prob_toxic: None,
            prob_severe_toxic: None,
            prob_identity_attack: None,
            prob_insult: None,
            prob_profanity: None,
            prob_threat: None,
        },
        Integration::Sociopolitical => LabelKind::Sociopolitical {
            is_sociopolitical: None,
            political_ideology: None,
        },
        Integration::Intergroup => LabelKind::Intergroup {
            prob_intergroup: None,
            label_intergroup: None,
        },
        Integration::Valence => LabelKind::Valence {
            valence: None,
            prob_valence: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_follow_integration() {
        let options = BatchOptions::for_integration(Integration::Valence);
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.strategy, RetryStrategy::Batch);

        let options = BatchOptions::for_integration(Integration::PerspectiveApi);
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.strategy, RetryStrategy::Individual);
    }

    #[test]
    fn test_backoff_doubles_from_initial_delay() {
        let initial = Duration::from_secs(1);
        assert_eq!(backoff_delay(initial, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(initial, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(initial, 2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        // Shift count past the u32 width.
        assert_eq!(
            backoff_delay(Duration::from_secs(1), 40),
            MAX_BACKOFF
        );
        // Large initial delay overflows the multiply before the shift does.
        assert_eq!(
            backoff_delay(Duration::from_secs(u64::MAX / 2), 3),
            MAX_BACKOFF
        );
    }

    #[test]
    fn test_failed_indices_skips_present_labels() {
        let post = PostToEnqueue {
            uri: "at://a".to_string(),
            text: "t".to_string(),
            preprocessing_timestamp: "2024-10-01-12:00:00".to_string(),
        };
        let labels = vec![
            None,
            Some(Label::successful(&post, empty_kind(Integration::Valence))),
            None,
        ];
        assert_eq!(failed_indices(&labels), vec![0, 2]);
    }
}
