use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::services::batch::RetryStrategy;

/// The ML labeling integrations known to the backfill engine.
///
/// Each variant is bound at compile time to a classifier implementation in
/// `services::classifiers`; there is no runtime name-based module lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, EnumIter, Display, PartialEq, Eq, Hash)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Integration {
    #[strum(serialize = "ml_inference_perspective_api")]
    #[serde(rename = "ml_inference_perspective_api")]
    PerspectiveApi,

    #[strum(serialize = "ml_inference_sociopolitical")]
    #[serde(rename = "ml_inference_sociopolitical")]
    Sociopolitical,

    #[strum(serialize = "ml_inference_intergroup")]
    #[serde(rename = "ml_inference_intergroup")]
    Intergroup,

    #[strum(serialize = "ml_inference_valence")]
    #[serde(rename = "ml_inference_valence")]
    Valence,
}

impl Integration {
    /// Name of the logical queue holding records waiting to be classified.
    pub fn input_queue_name(&self) -> String {
        format!("input_{}", self)
    }

    /// Name of the logical queue buffering labels waiting to be committed.
    pub fn output_queue_name(&self) -> String {
        format!("output_{}", self)
    }

    /// Column used to identify already-labeled records in storage.
    pub fn id_field(&self) -> &'static str {
        "uri"
    }

    /// Default number of records submitted to the classifier per call.
    pub fn default_batch_size(&self) -> usize {
        match self {
            // Perspective API is rate-limited per comment; small batches keep
            // the per-round fan-out within quota.
            Integration::PerspectiveApi => 50,
            Integration::Sociopolitical => 100,
            Integration::Intergroup => 100,
            Integration::Valence => 100,
        }
    }

    /// How failed records are resubmitted on retry.
    pub fn default_retry_strategy(&self) -> RetryStrategy {
        match self {
            // Perspective and the LLM prompts address records individually,
            // so only failed records are resubmitted. The valence model
            // scores a batch as a single unit and cannot be addressed
            // per-record mid-batch.
            Integration::PerspectiveApi => RetryStrategy::Individual,
            Integration::Sociopolitical => RetryStrategy::Individual,
            Integration::Intergroup => RetryStrategy::Individual,
            Integration::Valence => RetryStrategy::Batch,
        }
    }
}
