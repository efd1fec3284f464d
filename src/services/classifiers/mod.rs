use async_trait::async_trait;

use crate::models::label::Label;
use crate::models::post::PostToEnqueue;

pub mod llm;
pub mod perspective;

/// The boundary between the retry engine and an external classifier.
///
/// The output vector must have the same length and order as `batch`; `None`
/// at position i means "record i failed this round, retry it". From the
/// engine's perspective a classifier is a pure function; any batch-level
/// error it returns is degraded to all-`None` by the engine, never re-raised.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        batch: &[PostToEnqueue],
    ) -> Result<Vec<Option<Label>>, ClassifierError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse classifier response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("classifier returned {got} results for {expected} inputs")]
    LengthMismatch { expected: usize, got: usize },

    #[error("classifier misconfigured: {0}")]
    Config(String),
}
