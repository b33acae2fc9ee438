//! Queue tests

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_new_rejects_bad_capacity() {
    for capacity in [0, 1, 3, 6, 100] {
        assert_eq!(Queue::<u32>::new(capacity).unwrap_err(), QueueError::InvalidCapacity(capacity));
    }
    assert_eq!(Queue::<u32>::new(2).unwrap().capacity(), 2);
}

#[test]
fn test_with_bounds_validation() {
    assert!(Queue::<u32>::with_bounds(8, 4, 16).is_ok());
    assert_eq!(
        Queue::<u32>::with_bounds(8, 16, 4).unwrap_err(),
        QueueError::InvalidBounds { min: 16, max: 4 }
    );
    assert_eq!(
        Queue::<u32>::with_bounds(8, 3, 16).unwrap_err(),
        QueueError::InvalidBounds { min: 3, max: 16 }
    );
}

// ============================================================================
// Push / pop
// ============================================================================

#[test]
fn test_fifo_until_full() {
    let queue = Queue::new(4).unwrap();
    for i in 0..4 {
        queue.push(i).unwrap();
    }

    let rejected = queue.push(4).unwrap_err();
    assert_eq!(rejected.into_inner(), 4);
    assert_eq!(queue.len(), 4);

    for i in 0..4 {
        assert_eq!(queue.try_pop(), Some(i));
    }
    assert_eq!(queue.try_pop(), None);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_pop_waits_for_push() {
    let queue = Arc::new(Queue::new(4).unwrap());
    let cancel = CancellationToken::new();

    let q = Arc::clone(&queue);
    let c = cancel.clone();
    let consumer = tokio::spawn(async move { q.pop(&c).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.push(7u32).unwrap();

    assert_eq!(consumer.await.unwrap(), Some(7));
}

#[tokio::test]
async fn test_pop_cancelled_while_empty() {
    let queue = Queue::<u32>::new(4).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(queue.pop(&cancel).await, None);
}

#[tokio::test]
async fn test_pop_returns_queued_item_despite_cancel() {
    let queue = Queue::new(4).unwrap();
    queue.push(1u32).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(queue.pop(&cancel).await, Some(1));
    assert_eq!(queue.pop(&cancel).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_push_blocking_waits_for_room() {
    let queue = Arc::new(Queue::new(2).unwrap());
    queue.push(1u32).unwrap();
    queue.push(2).unwrap();

    let cancel = CancellationToken::new();
    let q = Arc::clone(&queue);
    let c = cancel.clone();
    let producer = tokio::spawn(async move { q.push_blocking(&c, 3, 100).await });

    tokio::time::sleep(Duration::from_millis(35)).await;
    assert_eq!(queue.try_pop(), Some(1));

    producer.await.unwrap().unwrap();
    assert_eq!(queue.bytes(), 100);
    assert_eq!(queue.try_pop(), Some(2));
    assert_eq!(queue.try_pop(), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_push_blocking_gives_value_back_on_cancel() {
    let queue = Queue::new(2).unwrap();
    queue.push(1u32).unwrap();
    queue.push(2).unwrap();

    let cancel = CancellationToken::new();
    let c = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        c.cancel();
    });

    let err = queue.push_blocking(&cancel, 3, 10).await.unwrap_err();
    assert_eq!(err.into_inner(), 3);
    assert_eq!(queue.bytes(), 0);
}

#[test]
fn test_release_bytes_saturates() {
    let queue = Queue::<u32>::new(2).unwrap();
    queue.record_bytes(10);
    queue.release_bytes(4);
    assert_eq!(queue.bytes(), 6);
    queue.release_bytes(100);
    assert_eq!(queue.bytes(), 0);
}

// ============================================================================
// Migration
// ============================================================================

#[test]
fn test_mutate_size_preserves_order() {
    let queue = Queue::new(4).unwrap();
    for i in 0..4 {
        queue.push(i).unwrap();
    }

    assert_eq!(queue.mutate_size(8), Ok(true));
    assert!(queue.is_migrating());
    assert_eq!(queue.capacity(), 8);

    for i in 4..12 {
        queue.push(i).unwrap();
    }
    assert_eq!(queue.len(), 12);

    let drained: Vec<u32> = std::iter::from_fn(|| queue.try_pop()).collect();
    assert_eq!(drained, (0..12).collect::<Vec<_>>());
    assert!(!queue.is_migrating());
}

#[test]
fn test_mutate_size_noop_while_migrating() {
    let queue = Queue::new(4).unwrap();
    queue.push(1u32).unwrap();

    assert_eq!(queue.mutate_size(8), Ok(true));
    assert_eq!(queue.mutate_size(16), Ok(false));
    assert_eq!(queue.capacity(), 8);

    assert_eq!(queue.try_pop(), Some(1));
    assert!(!queue.is_migrating());
    assert_eq!(queue.mutate_size(16), Ok(true));
}

#[test]
fn test_mutate_size_on_empty_queue_completes_on_next_pop() {
    let queue = Queue::<u32>::new(4).unwrap();
    assert_eq!(queue.mutate_size(2), Ok(true));
    assert!(queue.is_migrating());

    assert_eq!(queue.try_pop(), None);
    assert!(!queue.is_migrating());
    assert_eq!(queue.capacity(), 2);
}

#[test]
fn test_mutate_size_rejects_bad_capacity() {
    let queue = Queue::<u32>::new(4).unwrap();
    assert_eq!(queue.mutate_size(5), Err(QueueError::InvalidCapacity(5)));
    assert!(!queue.is_migrating());
}

#[tokio::test]
async fn test_waiting_consumer_follows_migration() {
    let queue = Arc::new(Queue::new(4).unwrap());
    let cancel = CancellationToken::new();

    let q = Arc::clone(&queue);
    let c = cancel.clone();
    let consumer = tokio::spawn(async move { q.pop(&c).await });

    // Consumer parks on the old ring before the resize
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.mutate_size(8).unwrap();
    queue.push(42u32).unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), consumer).await.unwrap().unwrap();
    assert_eq!(got, Some(42));
    assert!(!queue.is_migrating());
}

#[test]
fn test_drop_releases_items_in_both_rings() {
    let tracker = Arc::new(());
    {
        let queue = Queue::new(2).unwrap();
        queue.push(Arc::clone(&tracker)).unwrap();
        queue.mutate_size(4).unwrap();
        queue.push(Arc::clone(&tracker)).unwrap();
        assert_eq!(Arc::strong_count(&tracker), 3);
    }
    assert_eq!(Arc::strong_count(&tracker), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_consumers_with_resizes() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 5_000;

    let queue = Arc::new(Queue::with_bounds(8, 2, 1024).unwrap());
    let cancel = CancellationToken::new();

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let q = Arc::clone(&queue);
        let c = cancel.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..PER_PRODUCER {
                q.push_blocking(&c, p * PER_PRODUCER + i, 1).await.unwrap();
            }
        }));
    }

    let mut consumers = Vec::new();
    for _ in 0..3 {
        let q = Arc::clone(&queue);
        let c = cancel.clone();
        consumers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(v) = q.pop(&c).await {
                q.release_bytes(1);
                seen.push(v);
            }
            seen
        }));
    }

    let resizer = {
        let q = Arc::clone(&queue);
        tokio::spawn(async move {
            for round in 0..200 {
                let capacity = if round % 2 == 0 { 64 } else { 4 };
                let _ = q.mutate_size(capacity);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    for p in producers {
        p.await.unwrap();
    }
    resizer.await.unwrap();

    let total = PRODUCERS * PER_PRODUCER;
    let q = Arc::clone(&queue);
    let drained = tokio::time::timeout(Duration::from_secs(10), async move {
        while !q.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "queue never drained");
    cancel.cancel();

    let mut all = HashSet::new();
    for c in consumers {
        for v in c.await.unwrap() {
            assert!(all.insert(v), "item {v} delivered twice");
        }
    }
    assert_eq!(all.len() as u64, total);
}

#[test]
fn test_collect_metrics_resets_counters() {
    let queue = Queue::new(4).unwrap();
    queue.push(1u32).unwrap();
    queue.push(2).unwrap();
    queue.try_pop();

    let ns = sdsyslog_metrics::namespace(&["Receiver", "Output", "Queue"]);
    let metrics = queue.collect_metrics(&ns, Duration::from_secs(1));
    let value = |name: &str| {
        metrics
            .iter()
            .find(|m| m.name == name)
            .and_then(|m| m.value.raw.as_u64())
            .unwrap()
    };
    assert_eq!(value("depth"), 1);
    assert_eq!(value("push_success"), 2);
    assert_eq!(value("pop_success"), 1);

    let again = queue.collect_metrics(&ns, Duration::from_secs(1));
    let push = again.iter().find(|m| m.name == "push_success").unwrap();
    assert_eq!(push.value.raw.as_u64(), Some(0));
    assert_eq!(push.namespace_path(), "Receiver/Output/Queue");
}
