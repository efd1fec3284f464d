use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::post::PostToEnqueue;

/// Timestamp format used for `label_timestamp` and partition bookkeeping.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

/// Current UTC timestamp in the project-wide format.
pub fn current_timestamp_str() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Political lean assigned by the sociopolitical classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PoliticalIdeology {
    Left,
    Right,
    Moderate,
    Unclear,
}

/// Valence assigned by the valence classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Valence {
    Positive,
    Neutral,
    Negative,
}

/// Integration-specific classification payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelKind {
    Perspective {
        prob_toxic: Option<f64>,
        prob_severe_toxic: Option<f64>,
        prob_identity_attack: Option<f64>,
        prob_insult: Option<f64>,
        prob_profanity: Option<f64>,
        prob_threat: Option<f64>,
    },
    Sociopolitical {
        is_sociopolitical: Option<bool>,
        political_ideology: Option<PoliticalIdeology>,
    },
    Intergroup {
        prob_intergroup: Option<f64>,
        label_intergroup: Option<i64>,
    },
    Valence {
        valence: Option<Valence>,
        prob_valence: Option<f64>,
    },
}

/// One classification result for one record.
///
/// A classifier that could not label a record returns `None` for that slot
/// instead of a `Label`; a `Label` with `was_successfully_labeled = false` is
/// only ever constructed by the retry engine once the retry budget is
/// exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Label {
    pub uri: String,
    pub text: String,
    pub preprocessing_timestamp: String,
    /// When the record was labeled, or when labeling was last attempted.
    pub label_timestamp: String,
    pub was_successfully_labeled: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub kind: LabelKind,
}

impl Label {
    /// Build a successful label for `post`.
    pub fn successful(post: &PostToEnqueue, kind: LabelKind) -> Self {
        Self {
            uri: post.uri.clone(),
            text: post.text.clone(),
            preprocessing_timestamp: post.preprocessing_timestamp.clone(),
            label_timestamp: current_timestamp_str(),
            was_successfully_labeled: true,
            reason: None,
            kind,
        }
    }

    /// Build a terminal failure label for `post`. Only the retry engine
    /// calls this, after the retry budget is exhausted.
    pub fn failed(post: &PostToEnqueue, kind: LabelKind, reason: impl Into<String>) -> Self {
        Self {
            uri: post.uri.clone(),
            text: post.text.clone(),
            preprocessing_timestamp: post.preprocessing_timestamp.clone(),
            label_timestamp: current_timestamp_str(),
            was_successfully_labeled: false,
            reason: Some(reason.into()),
            kind,
        }
    }

    /// Recover the original unit of work from a label, for re-enqueueing.
    pub fn to_post(&self) -> PostToEnqueue {
        PostToEnqueue {
            uri: self.uri.clone(),
            text: self.text.clone(),
            preprocessing_timestamp: self.preprocessing_timestamp.clone(),
        }
    }
}

/// A label joined back to its originating input-queue row id, so the cache
/// write / queue deletion step can address the original row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelWithQueueId {
    pub queue_id: i64,
    pub label: Label,
}
