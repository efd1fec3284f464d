//! Queue contract: durable rows, unique ids, non-consuming loads,
//! delete-by-id, and metadata round-trips.

mod helpers;

use label_backfill::models::integration::Integration;
use label_backfill::models::post::PostToEnqueue;
use label_backfill::services::queue::Queue;

use helpers::{sample_posts, temp_queues};

#[tokio::test]
async fn test_enqueue_assigns_unique_ascending_ids() {
    let (dir, _) = temp_queues();
    let queue = Queue::open(dir.path(), "test_queue").await.unwrap();

    let posts = sample_posts(5);
    let inserted = queue.enqueue(&posts, None).await.unwrap();
    assert_eq!(inserted, 5);

    let items = queue.load_all::<PostToEnqueue>().await.unwrap();
    assert_eq!(items.len(), 5);
    for window in items.windows(2) {
        assert!(window[0].id < window[1].id);
    }
    for (item, post) in items.iter().zip(&posts) {
        assert_eq!(item.payload, *post);
    }
}

#[tokio::test]
async fn test_load_all_does_not_consume() {
    let (dir, _) = temp_queues();
    let queue = Queue::open(dir.path(), "test_queue").await.unwrap();
    queue.enqueue(&sample_posts(3), None).await.unwrap();

    let first = queue.load_all::<PostToEnqueue>().await.unwrap();
    let second = queue.load_all::<PostToEnqueue>().await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    assert_eq!(queue.len().await.unwrap(), 3);
}

#[tokio::test]
async fn test_metadata_round_trips() {
    let (dir, _) = temp_queues();
    let queue = Queue::open(dir.path(), "test_queue").await.unwrap();

    let metadata = serde_json::json!({
        "record_type": "posts",
        "start_date": "2024-10-01",
        "end_date": "2024-10-03",
    });
    queue
        .enqueue(&sample_posts(2), Some(&metadata))
        .await
        .unwrap();

    let items = queue.load_all::<PostToEnqueue>().await.unwrap();
    for item in items {
        assert_eq!(item.metadata, Some(metadata.clone()));
    }
}

#[tokio::test]
async fn test_delete_by_ids_removes_only_listed_rows() {
    let (dir, _) = temp_queues();
    let queue = Queue::open(dir.path(), "test_queue").await.unwrap();
    queue.enqueue(&sample_posts(5), None).await.unwrap();

    let ids = queue.load_ids().await.unwrap();
    let deleted = queue.delete_by_ids(&ids[..2]).await.unwrap();
    assert_eq!(deleted, 2);

    let remaining = queue.load_ids().await.unwrap();
    assert_eq!(remaining, ids[2..].to_vec());
}

#[tokio::test]
async fn test_delete_with_no_ids_is_a_no_op() {
    let (dir, _) = temp_queues();
    let queue = Queue::open(dir.path(), "test_queue").await.unwrap();
    queue.enqueue(&sample_posts(2), None).await.unwrap();

    assert_eq!(queue.delete_by_ids(&[]).await.unwrap(), 0);
    assert_eq!(queue.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_clear_empties_the_queue() {
    let (dir, _) = temp_queues();
    let queue = Queue::open(dir.path(), "test_queue").await.unwrap();
    queue.enqueue(&sample_posts(4), None).await.unwrap();

    assert_eq!(queue.clear().await.unwrap(), 4);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_large_batches_chunk_across_statements() {
    let (dir, _) = temp_queues();
    let queue = Queue::open(dir.path(), "test_queue").await.unwrap();

    // Larger than one multi-row statement chunk.
    let posts = sample_posts(1200);
    assert_eq!(queue.enqueue(&posts, None).await.unwrap(), 1200);
    assert_eq!(queue.len().await.unwrap(), 1200);

    let ids = queue.load_ids().await.unwrap();
    assert_eq!(queue.delete_by_ids(&ids).await.unwrap(), 1200);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_queues_are_isolated_per_name() {
    let (_dir, manager) = temp_queues();
    let input = manager.input(Integration::Valence).await.unwrap();
    let output = manager.output(Integration::Valence).await.unwrap();

    input.enqueue(&sample_posts(3), None).await.unwrap();
    assert_eq!(input.len().await.unwrap(), 3);
    assert_eq!(output.len().await.unwrap(), 0);

    // Reopening by name yields the same underlying queue.
    let again = manager
        .get(&Integration::Valence.input_queue_name())
        .await
        .unwrap();
    assert_eq!(again.len().await.unwrap(), 3);
}
