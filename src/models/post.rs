use garde::Validate;
use serde::{Deserialize, Serialize};

/// A preprocessed post waiting to be labeled.
///
/// Immutable unit of work: created when the repository loads raw data,
/// read-only from then on. `uri` is the stable identity used everywhere a
/// result must be reconciled with its originating record (never position).
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct PostToEnqueue {
    #[garde(length(min = 1))]
    pub uri: String,

    #[garde(length(min = 1))]
    pub text: String,

    /// Timestamp when the post was preprocessed (YYYY-MM-DD-HH:MM:SS).
    #[garde(length(min = 1))]
    pub preprocessing_timestamp: String,
}

/// A post joined with the input-queue row it was loaded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedPost {
    /// Row id of the originating input-queue item.
    pub queue_id: i64,
    pub post: PostToEnqueue,
}
