//! Tests for fragment routing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sdsyslog_metrics::namespace;
use sdsyslog_protocol::Payload;

use super::*;
use crate::shard::PacketDeadline;

/// Fixed shard set with an override table
struct TestView {
    shards: Vec<Arc<Shard>>,
    overrides: Mutex<HashMap<String, usize>>,
}

impl TestView {
    fn new(count: usize) -> Self {
        let deadline = Arc::new(PacketDeadline::new(Duration::from_secs(60)));
        let shards = (0..count)
            .map(|i| {
                let ns = namespace(&["Receiver", "Defrag", i.to_string().as_str()]);
                Arc::new(Shard::new(&ns, 16, Arc::clone(&deadline)))
            })
            .collect();
        Self {
            shards,
            overrides: Mutex::new(HashMap::new()),
        }
    }
}

impl RoutingView for TestView {
    fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, index: usize) -> Option<Arc<Shard>> {
        self.shards.get(index).cloned()
    }

    fn is_shard_shutdown(&self, index: usize) -> bool {
        self.shards.get(index).is_some_and(|s| s.is_shutdown())
    }

    fn bucket_exists(&self, index: usize, bucket_key: &str) -> bool {
        self.shards.get(index).is_some_and(|s| s.contains(bucket_key))
    }

    fn override_for(&self, bucket_key: &str) -> Option<usize> {
        self.overrides.lock().get(bucket_key).copied()
    }

    fn set_override(&self, bucket_key: &str, index: usize) {
        self.overrides.lock().insert(bucket_key.to_string(), index);
    }

    fn find_alternative_shard(&self, orig: usize) -> usize {
        self.shards
            .iter()
            .enumerate()
            .find(|(i, s)| *i != orig && !s.is_shutdown())
            .map_or(orig, |(i, _)| i)
    }
}

/// 10.0.0.1 with host 7 / log 42 hashes to shard 0 of 2
const IP: &str = "10.0.0.1";

fn fragment(seq: u16, seq_max: u16) -> Payload {
    Payload {
        host_id: 7,
        log_id: 42,
        message_seq: seq,
        message_seq_max: seq_max,
        hostname: "web01".into(),
        log_text: Bytes::from_static(b"text"),
        ..Default::default()
    }
}

// ============================================================================
// Address hashing
// ============================================================================

#[test]
fn test_ip_to_integers_v4() {
    assert_eq!(ip_to_integers("10.0.0.1").unwrap(), (0x0A00_0001, 0));
    assert_eq!(ip_to_integers("255.255.255.255").unwrap(), (u64::from(u32::MAX), 0));
}

#[test]
fn test_ip_to_integers_v6() {
    assert_eq!(ip_to_integers("::1").unwrap(), (0, 1));
    assert_eq!(ip_to_integers("2001:db8::ff").unwrap(), (0x2001_0db8_0000_0000, 0xff));
}

#[test]
fn test_ip_to_integers_invalid() {
    for bad in ["", "host.example", "10.0.0.256", "10.0.0.1:514"] {
        assert!(
            matches!(ip_to_integers(bad), Err(ReceiverError::InvalidAddress(_))),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn test_bucket_key_format() {
    assert_eq!(bucket_key(IP, &fragment(0, 0)), "10.0.0.1-7-42");
}

#[test]
fn test_default_shard_is_deterministic() {
    let ip = ip_to_integers(IP).unwrap();
    let first = default_shard(ip, &fragment(0, 3), 5);
    for seq in 1..=3 {
        assert_eq!(default_shard(ip, &fragment(seq, 3), 5), first);
    }
    assert_eq!(default_shard(ip, &fragment(0, 0), 2), 0);
}

#[test]
fn test_default_shard_wraps() {
    let payload = Payload {
        host_id: u32::MAX,
        log_id: u32::MAX,
        ..Default::default()
    };
    // Must not overflow-panic
    let index = default_shard((u64::MAX, u64::MAX), &payload, 7);
    assert!(index < 7);
}

// ============================================================================
// Routing decisions
// ============================================================================

#[tokio::test]
async fn test_route_to_default_shard() {
    let view = TestView::new(2);
    let cancel = CancellationToken::new();

    let index = route_fragment(&cancel, &view, IP, fragment(0, 1), Instant::now())
        .await
        .unwrap();

    assert_eq!(index, 0);
    assert!(view.shards[0].contains("10.0.0.1-7-42"));
    assert!(view.override_for("10.0.0.1-7-42").is_none());
}

#[tokio::test]
async fn test_route_without_shards() {
    let view = TestView::new(0);
    let cancel = CancellationToken::new();

    let err = route_fragment(&cancel, &view, IP, fragment(0, 0), Instant::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ReceiverError::NoShards));
}

#[tokio::test]
async fn test_route_invalid_address() {
    let view = TestView::new(2);
    let cancel = CancellationToken::new();

    let err = route_fragment(&cancel, &view, "nope", fragment(0, 0), Instant::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ReceiverError::InvalidAddress(_)));
}

#[tokio::test]
async fn test_new_stream_avoids_shutdown_shard() {
    let view = TestView::new(2);
    let cancel = CancellationToken::new();
    view.shards[0].start_shutdown();

    let index = route_fragment(&cancel, &view, IP, fragment(0, 2), Instant::now())
        .await
        .unwrap();

    assert_eq!(index, 1);
    assert_eq!(view.override_for("10.0.0.1-7-42"), Some(1));
    assert!(!view.shards[0].contains("10.0.0.1-7-42"));

    // Later fragments follow the override
    for seq in 1..=2 {
        let index = route_fragment(&cancel, &view, IP, fragment(seq, 2), Instant::now())
            .await
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(view.override_for("10.0.0.1-7-42"), Some(1));
    }

    let cancel = CancellationToken::new();
    let key = tokio::time::timeout(Duration::from_secs(1), view.shards[1].pop_key(&cancel))
        .await
        .unwrap();
    assert_eq!(key.as_deref(), Some("10.0.0.1-7-42"));
}

#[tokio::test]
async fn test_stream_in_progress_stays_on_shutdown_shard() {
    let view = TestView::new(2);
    let cancel = CancellationToken::new();

    route_fragment(&cancel, &view, IP, fragment(0, 1), Instant::now())
        .await
        .unwrap();
    view.shards[0].start_shutdown();

    let index = route_fragment(&cancel, &view, IP, fragment(1, 1), Instant::now())
        .await
        .unwrap();

    assert_eq!(index, 0);
    assert!(view.override_for("10.0.0.1-7-42").is_none());
    assert_eq!(view.shards[0].metrics().waiting_buckets.get(), 1);
}

#[tokio::test]
async fn test_all_shards_shutdown_falls_back_to_default() {
    let view = TestView::new(2);
    let cancel = CancellationToken::new();
    view.shards[0].start_shutdown();
    view.shards[1].start_shutdown();

    let index = route_fragment(&cancel, &view, IP, fragment(0, 1), Instant::now())
        .await
        .unwrap();

    assert_eq!(index, 0);
    assert_eq!(view.override_for("10.0.0.1-7-42"), Some(0));
}
