//! Enqueue service: dedup against already-labeled records, the feed lookback
//! join, and validation at the queue boundary.

mod helpers;

use std::collections::HashSet;

use tempfile::TempDir;

use label_backfill::db;
use label_backfill::db::local_store::LocalStorageRepository;
use label_backfill::models::integration::Integration;
use label_backfill::models::post::PostToEnqueue;
use label_backfill::services::enqueue::{EnqueueService, RecordType};
use label_backfill::services::queue::QueueManager;

use helpers::{sample_label, sample_post};

const INTEGRATION: Integration = Integration::Sociopolitical;

async fn setup() -> (TempDir, LocalStorageRepository, QueueManager) {
    let dir = TempDir::new().unwrap();
    let pool = db::init_pool(&dir.path().join("store.db")).await.unwrap();
    let repository = LocalStorageRepository::new(pool);
    repository.init_schema().await.unwrap();
    let queues = QueueManager::new(dir.path().join("queue"));
    (dir, repository, queues)
}

async fn seed_posts(repository: &LocalStorageRepository, count: usize, partition_date: &str) -> Vec<PostToEnqueue> {
    let posts: Vec<PostToEnqueue> = (0..count).map(sample_post).collect();
    let rows: Vec<(PostToEnqueue, String)> = posts
        .iter()
        .map(|p| (p.clone(), partition_date.to_string()))
        .collect();
    repository.insert_posts(&rows).await.unwrap();
    posts
}

#[tokio::test]
async fn test_already_labeled_uris_are_skipped() {
    let (_dir, repository, queues) = setup().await;
    let posts = seed_posts(&repository, 5, "2024-10-01").await;

    // Two of the five already carry labels from the live pipeline.
    let labeled = [sample_label(&posts[0]), sample_label(&posts[3])];
    repository
        .insert_active_labels(INTEGRATION, &labeled)
        .await
        .unwrap();

    let service = EnqueueService::new(&repository, &queues, 5);
    let summary = service
        .enqueue(RecordType::Posts, &[INTEGRATION], "2024-10-01", "2024-10-01")
        .await
        .unwrap();

    assert_eq!(summary.counts.len(), 1);
    assert_eq!(summary.counts[0].candidates, 5);
    assert_eq!(summary.counts[0].skipped_already_labeled, 2);
    assert_eq!(summary.counts[0].enqueued, 3);

    let queue = queues.input(INTEGRATION).await.unwrap();
    let queued: HashSet<String> = queue
        .load_all::<PostToEnqueue>()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.payload.uri)
        .collect();
    let expected: HashSet<String> = [1usize, 2, 4]
        .iter()
        .map(|&i| posts[i].uri.clone())
        .collect();
    assert_eq!(queued, expected);
}

#[tokio::test]
async fn test_reenqueue_tolerates_pending_duplicates() {
    let (_dir, repository, queues) = setup().await;
    seed_posts(&repository, 3, "2024-10-01").await;

    let service = EnqueueService::new(&repository, &queues, 5);
    for _ in 0..2 {
        service
            .enqueue(RecordType::Posts, &[INTEGRATION], "2024-10-01", "2024-10-01")
            .await
            .unwrap();
    }

    // Nothing ran between the two passes, so nothing got labeled: the same
    // three records are simply pending twice. That is tolerated, not an
    // error.
    let queue = queues.input(INTEGRATION).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 6);
}

#[tokio::test]
async fn test_labeled_set_shared_load_is_per_integration() {
    let (_dir, repository, queues) = setup().await;
    let posts = seed_posts(&repository, 4, "2024-10-01").await;

    // Labeled for sociopolitical only; valence still needs all four.
    repository
        .insert_active_labels(INTEGRATION, &[sample_label(&posts[0])])
        .await
        .unwrap();

    let service = EnqueueService::new(&repository, &queues, 5);
    let summary = service
        .enqueue(
            RecordType::Posts,
            &[INTEGRATION, Integration::Valence],
            "2024-10-01",
            "2024-10-01",
        )
        .await
        .unwrap();

    assert_eq!(summary.counts[0].enqueued, 3);
    assert_eq!(summary.counts[1].enqueued, 4);
}

#[tokio::test]
async fn test_feed_record_type_applies_lookback_join() {
    let (_dir, repository, queues) = setup().await;

    // One post preprocessed inside the lookback window before the start
    // date, one inside the range, one old post outside the window.
    let in_window = sample_post(0);
    let in_range = sample_post(1);
    let too_old = sample_post(2);
    let never_in_feed = sample_post(3);
    repository
        .insert_posts(&[
            (in_window.clone(), "2024-09-28".to_string()),
            (in_range.clone(), "2024-10-02".to_string()),
            (too_old.clone(), "2024-09-20".to_string()),
            (never_in_feed.clone(), "2024-10-02".to_string()),
        ])
        .await
        .unwrap();

    // All but one were surfaced in feeds during the requested range.
    repository
        .insert_feed_posts(&[
            (in_window.uri.clone(), "2024-10-01".to_string()),
            (in_range.uri.clone(), "2024-10-02".to_string()),
            (too_old.uri.clone(), "2024-10-01".to_string()),
        ])
        .await
        .unwrap();

    let service = EnqueueService::new(&repository, &queues, 5);
    let summary = service
        .enqueue(
            RecordType::PostsUsedInFeeds,
            &[INTEGRATION],
            "2024-10-01",
            "2024-10-03",
        )
        .await
        .unwrap();

    assert_eq!(summary.counts[0].enqueued, 2);
    let queue = queues.input(INTEGRATION).await.unwrap();
    let queued: HashSet<String> = queue
        .load_all::<PostToEnqueue>()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.payload.uri)
        .collect();
    assert!(queued.contains(&in_window.uri));
    assert!(queued.contains(&in_range.uri));
    assert!(!queued.contains(&too_old.uri));
    assert!(!queued.contains(&never_in_feed.uri));
}

#[tokio::test]
async fn test_enqueue_metadata_records_the_request() {
    let (_dir, repository, queues) = setup().await;
    seed_posts(&repository, 1, "2024-10-01").await;

    let service = EnqueueService::new(&repository, &queues, 5);
    service
        .enqueue(RecordType::Posts, &[INTEGRATION], "2024-10-01", "2024-10-02")
        .await
        .unwrap();

    let queue = queues.input(INTEGRATION).await.unwrap();
    let items = queue.load_all::<PostToEnqueue>().await.unwrap();
    let metadata = items[0].metadata.as_ref().unwrap();
    assert_eq!(metadata["record_type"], "posts");
    assert_eq!(metadata["start_date"], "2024-10-01");
    assert_eq!(metadata["end_date"], "2024-10-02");
}
