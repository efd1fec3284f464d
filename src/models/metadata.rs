use serde::{Deserialize, Serialize};

use crate::models::integration::Integration;

/// Aggregate outcome of one batch-classification invocation.
///
/// Derived from the run, never persisted independently. `total_batches`
/// counts the first round's batches; retry rounds re-process the same work.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchRunMetadata {
    pub total_batches: usize,
    pub total_successfully_labeled: usize,
    pub total_failed: usize,
}

/// Per-integration outcome, as aggregated by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRunOutcome {
    pub integration: Integration,
    pub metadata: BatchRunMetadata,
}

/// Outcome of one coordinator invocation across all configured integrations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub outcomes: Vec<IntegrationRunOutcome>,
}

impl RunReport {
    pub fn total_successfully_labeled(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| o.metadata.total_successfully_labeled)
            .sum()
    }

    pub fn total_failed(&self) -> usize {
        self.outcomes.iter().map(|o| o.metadata.total_failed).sum()
    }
}
