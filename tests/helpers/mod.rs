//! Shared helpers for the queue / engine / runner tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use tempfile::TempDir;

use label_backfill::models::label::{Label, LabelKind, PoliticalIdeology};
use label_backfill::models::post::{PostToEnqueue, QueuedPost};
use label_backfill::services::classifiers::{Classifier, ClassifierError};
use label_backfill::services::queue::{Queue, QueueManager};

/// How the scripted classifier answers one `classify` call.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Label every record in the batch.
    AllSucceed,
    /// Return `None` for every record.
    AllFail,
    /// Label only the records whose uri is listed; `None` for the rest.
    /// Deterministic even when batches within a round race each other.
    SucceedUris(HashSet<String>),
    /// Return a vector one element short.
    WrongLength,
    /// Return an error from the call itself.
    Error,
}

/// A classifier whose behavior is scripted call by call. Records every call's
/// batch uris and timing so tests can assert dispatch shapes and backoff.
/// Panics if called more times than the script allows.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<ScriptedResponse>>,
    calls: AtomicUsize,
    seen_batches: Mutex<Vec<Vec<String>>>,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            seen_batches: Mutex::new(Vec::new()),
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The uris of every batch seen, in call order.
    pub fn seen_batches(&self) -> Vec<Vec<String>> {
        self.seen_batches.lock().unwrap().clone()
    }

    /// When each call arrived, in call order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        batch: &[PostToEnqueue],
    ) -> Result<Vec<Option<Label>>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        self.seen_batches
            .lock()
            .unwrap()
            .push(batch.iter().map(|p| p.uri.clone()).collect());

        let response = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted classifier called more times than scripted");

        match response {
            ScriptedResponse::AllSucceed => {
                Ok(batch.iter().map(|p| Some(sample_label(p))).collect())
            }
            ScriptedResponse::AllFail => Ok(vec![None; batch.len()]),
            ScriptedResponse::SucceedUris(uris) => Ok(batch
                .iter()
                .map(|p| uris.contains(&p.uri).then(|| sample_label(p)))
                .collect()),
            ScriptedResponse::WrongLength => {
                Ok(vec![None; batch.len().saturating_sub(1)])
            }
            ScriptedResponse::Error => Err(ClassifierError::Config(
                "scripted failure".to_string(),
            )),
        }
    }
}

pub fn sample_label(post: &PostToEnqueue) -> Label {
    Label::successful(
        post,
        LabelKind::Sociopolitical {
            is_sociopolitical: Some(true),
            political_ideology: Some(PoliticalIdeology::Moderate),
        },
    )
}

pub fn sample_post(n: usize) -> PostToEnqueue {
    PostToEnqueue {
        uri: format!("at://did:plc:test/app.bsky.feed.post/{n}"),
        text: format!("post number {n}"),
        preprocessing_timestamp: "2024-10-01-12:00:00".to_string(),
    }
}

pub fn sample_posts(count: usize) -> Vec<PostToEnqueue> {
    (0..count).map(sample_post).collect()
}

/// A scratch directory with a queue manager rooted in it. Keep the `TempDir`
/// alive for the duration of the test.
pub fn temp_queues() -> (TempDir, QueueManager) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let manager = QueueManager::new(dir.path().to_path_buf());
    (dir, manager)
}

/// Seed `queue` with `posts` and return them joined to their assigned ids.
pub async fn seed_queue(queue: &Queue, posts: &[PostToEnqueue]) -> Vec<QueuedPost> {
    queue.enqueue(posts, None).await.expect("enqueue failed");
    queue
        .load_all::<PostToEnqueue>()
        .await
        .expect("load failed")
        .into_iter()
        .map(|item| QueuedPost {
            queue_id: item.id,
            post: item.payload,
        })
        .collect()
}
