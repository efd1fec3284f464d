use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;

use crate::models::label::{Label, LabelKind, PoliticalIdeology, Valence};
use crate::models::post::PostToEnqueue;
use crate::services::classifiers::{Classifier, ClassifierError};

/// Total deadline per request; generous because a minibatch completion can
/// take tens of seconds. A request that outlives it errors out and degrades
/// to `None` entries for the minibatch, instead of stalling the round.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Which labeling task the LLM is prompted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmTask {
    Sociopolitical,
    Intergroup,
    Valence,
}

/// Chat-completions classifier shared by the sociopolitical, intergroup and
/// valence integrations.
///
/// A batch is split into minibatches; each minibatch becomes one
/// numbered-prompt request, fanned out concurrently. The model must return
/// one label per numbered post; a minibatch whose label count mismatches is
/// dropped (all `None`) for this round, other minibatches are unaffected.
pub struct LlmClassifier {
    http: Client,
    api_base: String,
    api_key: String,
    model_name: String,
    task: LlmTask,
    minibatch_size: usize,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// One entry of the `{"labels": [...]}` body the prompt demands. Fields are
/// optional so one schema covers all three tasks.
#[derive(Deserialize)]
struct RawLlmLabel {
    is_sociopolitical: Option<bool>,
    political_ideology_label: Option<String>,
    is_intergroup: Option<bool>,
    valence: Option<String>,
}

#[derive(Deserialize)]
struct RawLlmLabels {
    labels: Vec<RawLlmLabel>,
}

impl LlmClassifier {
    pub fn new(
        api_base: String,
        api_key: String,
        model_name: String,
        task: LlmTask,
        minibatch_size: usize,
    ) -> Result<Self, ClassifierError> {
        Self::with_timeout(
            api_base,
            api_key,
            model_name,
            task,
            minibatch_size,
            REQUEST_TIMEOUT,
        )
    }

    /// Build with an explicit request deadline.
    pub fn with_timeout(
        api_base: String,
        api_key: String,
        model_name: String,
        task: LlmTask,
        minibatch_size: usize,
        timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base,
            api_key,
            model_name,
            task,
            minibatch_size: minibatch_size.max(1),
        })
    }

    fn task_instructions(&self) -> &'static str {
        match self.task {
            LlmTask::Sociopolitical => concat!(
                "You are a classifier that predicts whether a post has sociopolitical content. ",
                "Sociopolitical means related to politics (government, elections, politicians, activism) ",
                "or social issues (the economy, inequality, racism, education, immigration, human rights, ",
                "the environment). For each numbered post return an object with ",
                "\"is_sociopolitical\" (true/false) and \"political_ideology_label\" ",
                "(one of \"left\", \"right\", \"moderate\", \"unclear\"; use \"unclear\" when not sociopolitical). ",
                "Base political lean on US politics.",
            ),
            LlmTask::Intergroup => concat!(
                "You are a classifier that predicts whether a post contains intergroup content, ",
                "meaning content about relations, comparisons, or conflict between social groups ",
                "(an in-group and an out-group). For each numbered post return an object with ",
                "\"is_intergroup\" (true/false).",
            ),
            LlmTask::Valence => concat!(
                "You are a classifier that predicts the emotional valence of a post. ",
                "For each numbered post return an object with \"valence\" ",
                "(one of \"positive\", \"neutral\", \"negative\").",
            ),
        }
    }

    fn build_prompt(&self, posts: &[PostToEnqueue]) -> String {
        let mut enumerated = String::new();
        for (i, post) in posts.iter().enumerate() {
            enumerated.push_str(&format!("{}. {}\n", i + 1, post.text.trim()));
        }
        format!(
            "{}\n\nReturn ONLY a JSON object of the form {{\"labels\": [...]}} with exactly one \
             entry per numbered post, in order. Do NOT include any explanation.\n\nTEXT:\n```\n{}```\n",
            self.task_instructions(),
            enumerated,
        )
    }

    fn to_label(&self, post: &PostToEnqueue, raw: &RawLlmLabel) -> Label {
        let kind = match self.task {
            LlmTask::Sociopolitical => LabelKind::Sociopolitical {
                is_sociopolitical: raw.is_sociopolitical,
                political_ideology: raw
                    .political_ideology_label
                    .as_deref()
                    .and_then(|s| PoliticalIdeology::from_str(s).ok()),
            },
            LlmTask::Intergroup => LabelKind::Intergroup {
                prob_intergroup: None,
                label_intergroup: raw.is_intergroup.map(i64::from),
            },
            LlmTask::Valence => LabelKind::Valence {
                valence: raw.valence.as_deref().and_then(|s| Valence::from_str(s).ok()),
                prob_valence: None,
            },
        };
        Label::successful(post, kind)
    }

    /// Run one minibatch through the model. Returns one slot per post;
    /// any request, parse or count failure fails the whole minibatch.
    async fn classify_minibatch(&self, posts: &[PostToEnqueue]) -> Vec<Option<Label>> {
        match self.request_labels(posts).await {
            Ok(raw_labels) if raw_labels.len() == posts.len() => posts
                .iter()
                .zip(raw_labels.iter())
                .map(|(post, raw)| Some(self.to_label(post, raw)))
                .collect(),
            Ok(raw_labels) => {
                tracing::warn!(
                    expected = posts.len(),
                    got = raw_labels.len(),
                    "LLM returned wrong number of labels for minibatch, will retry"
                );
                vec![None; posts.len()]
            }
            Err(e) => {
                tracing::warn!(error = %e, "LLM minibatch request failed, will retry");
                vec![None; posts.len()]
            }
        }
    }

    async fn request_labels(
        &self,
        posts: &[PostToEnqueue],
    ) -> Result<Vec<RawLlmLabel>, ClassifierError> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let request_body = serde_json::json!({
            "model": self.model_name,
            "messages": [{ "role": "user", "content": self.build_prompt(posts) }],
            "response_format": { "type": "json_object" },
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(ClassifierError::Http)?
            .error_for_status()
            .map_err(ClassifierError::Http)?;

        let completion: ChatCompletionResponse =
            response.json().await.map_err(ClassifierError::Http)?;
        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        let parsed: RawLlmLabels =
            serde_json::from_str(content).map_err(ClassifierError::Parse)?;
        Ok(parsed.labels)
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        batch: &[PostToEnqueue],
    ) -> Result<Vec<Option<Label>>, ClassifierError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let minibatches: Vec<&[PostToEnqueue]> = batch.chunks(self.minibatch_size).collect();
        let results = join_all(
            minibatches
                .iter()
                .map(|minibatch| self.classify_minibatch(minibatch)),
        )
        .await;

        Ok(results.into_iter().flatten().collect())
    }
}
