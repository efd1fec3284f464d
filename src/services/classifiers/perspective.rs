use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;

use crate::models::label::{Label, LabelKind};
use crate::models::post::PostToEnqueue;
use crate::services::classifiers::{Classifier, ClassifierError};

const ANALYZE_URL: &str =
    "https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze";

/// Total deadline per request. A request that outlives it errors out and
/// degrades to `None` for that record, instead of stalling the round.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const REQUESTED_ATTRIBUTES: &[&str] = &[
    "TOXICITY",
    "SEVERE_TOXICITY",
    "IDENTITY_ATTACK",
    "INSULT",
    "PROFANITY",
    "THREAT",
];

/// Client for the Perspective API `comments:analyze` endpoint.
///
/// The API scores one comment per request, so a batch fans out into
/// concurrent per-record requests; a failed request yields `None` for that
/// record only.
pub struct PerspectiveClassifier {
    http: Client,
    api_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    attribute_scores: HashMap<String, AttributeScore>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeScore {
    summary_score: SummaryScore,
}

#[derive(Deserialize)]
struct SummaryScore {
    value: f64,
}

impl PerspectiveClassifier {
    pub fn new(api_key: String) -> Result<Self, ClassifierError> {
        Self::with_timeout(api_key, REQUEST_TIMEOUT)
    }

    /// Build with an explicit request deadline.
    pub fn with_timeout(api_key: String, timeout: Duration) -> Result<Self, ClassifierError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, api_key })
    }

    async fn analyze(&self, post: &PostToEnqueue) -> Result<Label, ClassifierError> {
        let mut requested = serde_json::Map::new();
        for attribute in REQUESTED_ATTRIBUTES {
            requested.insert(attribute.to_string(), serde_json::json!({}));
        }

        let request_body = serde_json::json!({
            "comment": { "text": post.text },
            "languages": ["en"],
            "requestedAttributes": requested,
        });

        let response = self
            .http
            .post(ANALYZE_URL)
            .query(&[("key", &self.api_key)])
            .json(&request_body)
            .send()
            .await
            .map_err(ClassifierError::Http)?
            .error_for_status()
            .map_err(ClassifierError::Http)?;

        let scores: AnalyzeResponse = response.json().await.map_err(ClassifierError::Http)?;
        let score = |name: &str| -> Option<f64> {
            scores
                .attribute_scores
                .get(name)
                .map(|a| a.summary_score.value)
        };

        Ok(Label::successful(
            post,
            LabelKind::Perspective {
                prob_toxic: score("TOXICITY"),
                prob_severe_toxic: score("SEVERE_TOXICITY"),
                prob_identity_attack: score("IDENTITY_ATTACK"),
                prob_insult: score("INSULT"),
                prob_profanity: score("PROFANITY"),
                prob_threat: score("THREAT"),
            },
        ))
    }
}

#[async_trait]
impl Classifier for PerspectiveClassifier {
    async fn classify(
        &self,
        batch: &[PostToEnqueue],
    ) -> Result<Vec<Option<Label>>, ClassifierError> {
        let requests = batch.iter().map(|post| async move {
            match self.analyze(post).await {
                Ok(label) => Some(label),
                Err(e) => {
                    tracing::warn!(uri = %post.uri, error = %e, "Perspective API request failed");
                    None
                }
            }
        });
        Ok(join_all(requests).await)
    }
}
