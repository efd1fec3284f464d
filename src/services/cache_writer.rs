use crate::db::repository::{AdapterError, DataRepository};
use crate::models::integration::Integration;
use crate::models::label::LabelWithQueueId;
use crate::services::queue::{QueueError, QueueManager};

/// Flushes buffered labels from output queues into long-term storage.
///
/// Writing and clearing are separate operations by contract: a caller must
/// `write_cache` before `clear_cache`, and nothing stops another writer from
/// appending in between. Single-writer is assumed here as everywhere else.
pub struct CacheBufferWriter<'a> {
    repository: &'a dyn DataRepository,
    queues: &'a QueueManager,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheWriterError {
    #[error("queue error while flushing cache buffer: {0}")]
    Queue(#[from] QueueError),

    #[error("repository error while writing labels: {0}")]
    Adapter(#[from] AdapterError),
}

impl<'a> CacheBufferWriter<'a> {
    pub fn new(repository: &'a dyn DataRepository, queues: &'a QueueManager) -> Self {
        Self { repository, queues }
    }

    /// Write every buffered label for `integration` to the repository.
    /// Deletes nothing; returns the number of labels written.
    pub async fn write_cache(&self, integration: Integration) -> Result<usize, CacheWriterError> {
        let queue = self.queues.output(integration).await?;
        let items = queue.load_all::<LabelWithQueueId>().await?;
        if items.is_empty() {
            tracing::info!(integration = %integration, "Output queue empty, nothing to write");
            return Ok(0);
        }

        let labels: Vec<_> = items.into_iter().map(|item| item.payload.label).collect();
        self.repository.write_records(integration, &labels).await?;
        tracing::info!(
            integration = %integration,
            written = labels.len(),
            "Wrote buffered labels to storage"
        );
        Ok(labels.len())
    }

    /// Delete every buffered label for `integration` from the output queue.
    /// Returns the number of rows deleted.
    pub async fn clear_cache(&self, integration: Integration) -> Result<u64, CacheWriterError> {
        let queue = self.queues.output(integration).await?;
        let ids = queue.load_ids().await?;
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = queue.delete_by_ids(&ids).await?;
        tracing::info!(integration = %integration, deleted, "Cleared output queue");
        Ok(deleted)
    }
}
