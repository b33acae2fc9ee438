//! Tests for autoscaling decisions

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use sdsyslog_config::{NetworkConfig, ReceiverConfig};
use sdsyslog_metrics::{Metric, MetricKind, Raw};
use sdsyslog_protocol::JsonCodec;
use sdsyslog_queue::Queue;

use super::*;

const INTERVAL: Duration = Duration::from_secs(1);

/// Write `values` as consecutive slices ending now, oldest first
fn record<V: Into<Raw> + Copy>(registry: &Registry, name: &str, ns: &[String], values: &[V]) {
    let now = Utc::now();
    for (i, value) in values.iter().enumerate() {
        let age = (values.len() - 1 - i) as i64;
        let slice = registry.new_time_slice(now - chrono::Duration::seconds(age), INTERVAL);
        registry.add(slice, vec![Metric::new(name, "test", ns, MetricKind::Gauge, *value, "count", INTERVAL)]);
    }
}

fn listener_ns(id: usize) -> Vec<String> {
    namespace::child(&namespace::ingest_instance(id), namespace::LISTENER)
}

fn shard_ns(id: usize) -> Vec<String> {
    namespace::child(&namespace::defrag_pair(id), namespace::QUEUE)
}

struct Fixture {
    registry: Arc<Registry>,
    ingest: Arc<IngestManager>,
    processor: Arc<ProcessorManager>,
    defrag: Arc<DefragManager>,
    autoscaler: Autoscaler,
    cancel: CancellationToken,
}

impl Fixture {
    async fn new() -> Self {
        let mut config = ReceiverConfig::default();
        config.metrics.interval = INTERVAL;
        config.defrag.packet_deadline = Duration::from_millis(100);
        config.defrag.min_packet_deadline = Duration::from_millis(50);
        config.defrag.max_packet_deadline = Duration::from_millis(200);
        config.defrag.deadline_step = Duration::from_millis(10);

        let cancel = CancellationToken::new();
        let registry = Arc::new(Registry::new());

        let output = Arc::new(OutputManager::new(
            Arc::new(Queue::with_bounds(4, 2, 16).unwrap()),
            Duration::from_millis(500),
            cancel.clone(),
        ));
        let defrag = Arc::new(DefragManager::new(
            &config.defrag,
            Arc::clone(output.inbox()),
            16,
            Duration::from_secs(1),
            1,
            3,
            cancel.clone(),
        ));
        let processor = Arc::new(ProcessorManager::new(
            Arc::new(Queue::with_bounds(4, 2, 16).unwrap()),
            Arc::new(JsonCodec),
            defrag.routing(),
            1,
            3,
            cancel.clone(),
        ));
        let network = NetworkConfig {
            address: "127.0.0.1".into(),
            port: 0,
            buffer_size: 2048,
            min_packet_len: 1,
        };
        let ingest = Arc::new(IngestManager::new(&network, Arc::clone(processor.inbox()), 1, 2, cancel.clone()).unwrap());

        ingest.add_instance().unwrap();
        processor.add_instance();
        defrag.add_instance().await;

        let autoscaler = Autoscaler::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&ingest),
            Arc::clone(&processor),
            Arc::clone(&defrag),
            output,
        );

        Self {
            registry,
            ingest,
            processor,
            defrag,
            autoscaler,
            cancel,
        }
    }

    async fn shutdown(self) {
        self.ingest.remove_all().await;
        self.processor.remove_all().await;
        self.defrag.remove_all().await;
        self.cancel.cancel();
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

#[test]
fn test_listener_trend() {
    assert_eq!(listener_trend(&[60.0, 62.0, 64.0, 66.0, 68.0]), Scale::Up);
    assert_eq!(listener_trend(&[10.0, 8.0, 6.0, 4.0, 2.0]), Scale::Down);
    assert_eq!(listener_trend(&[40.0, 40.0, 40.0, 40.0, 40.0]), Scale::Hold);
    // Busy but flat
    assert_eq!(listener_trend(&[90.0, 90.0, 90.0, 90.0, 90.0]), Scale::Hold);
    // Rising but mostly idle
    assert_eq!(listener_trend(&[1.0, 3.0, 5.0, 7.0, 9.0]), Scale::Hold);
}

#[test]
fn test_listener_trend_degenerate() {
    assert_eq!(listener_trend(&[]), Scale::Hold);
    assert_eq!(listener_trend(&[75.0]), Scale::Hold);
}

#[test]
fn test_combine_damps_outlier() {
    let mut histories = vec![vec![10u64; SAMPLE_COUNT]; 9];
    histories.push(vec![10_000; SAMPLE_COUNT]);

    assert_eq!(combine_u64(&histories), Some(vec![10; SAMPLE_COUNT]));
    assert_eq!(combine_u64(&[]), None);
    assert_eq!(combine_f64(&[vec![1.0, 2.0, 3.0, 4.0, 5.0]]), Some(vec![1.0, 2.0, 3.0, 4.0, 5.0]));
}

#[test]
fn test_step_deadline_clamps() {
    let ms = Duration::from_millis;
    assert_eq!(step_deadline(ms(100), ms(10), Scale::Up, ms(50), ms(200)), ms(110));
    assert_eq!(step_deadline(ms(100), ms(10), Scale::Down, ms(50), ms(200)), ms(90));
    assert_eq!(step_deadline(ms(195), ms(10), Scale::Up, ms(50), ms(200)), ms(200));
    assert_eq!(step_deadline(ms(200), ms(10), Scale::Up, ms(50), ms(200)), ms(200));
    assert_eq!(step_deadline(ms(55), ms(10), Scale::Down, ms(50), ms(200)), ms(50));
    // Moves off a bound in the other direction
    assert_eq!(step_deadline(ms(50), ms(10), Scale::Up, ms(50), ms(200)), ms(60));
    assert_eq!(step_deadline(ms(100), ms(10), Scale::Hold, ms(50), ms(200)), ms(100));
}

// ============================================================================
// Stage scaling
// ============================================================================

#[tokio::test]
async fn test_busy_listeners_scale_up_to_max() {
    let fx = Fixture::new().await;
    record(&fx.registry, "busy_time_percent", &listener_ns(0), &[60.0, 65.0, 70.0, 75.0, 80.0]);

    fx.autoscaler.scale_listeners().await;
    assert_eq!(fx.ingest.count(), 2);

    // Listener 1 has no history and is left out; listener 0 still says up,
    // but the pool is at its max of 2
    fx.autoscaler.scale_listeners().await;
    assert_eq!(fx.ingest.count(), 2);

    fx.shutdown().await;
}

#[tokio::test]
async fn test_idle_listeners_stay_at_min() {
    let fx = Fixture::new().await;
    record(&fx.registry, "busy_time_percent", &listener_ns(0), &[18.0, 14.0, 10.0, 6.0, 2.0]);

    fx.autoscaler.scale_listeners().await;
    assert_eq!(fx.ingest.count(), 1);

    fx.shutdown().await;
}

#[tokio::test]
async fn test_short_history_holds() {
    let fx = Fixture::new().await;
    record(&fx.registry, "busy_time_percent", &listener_ns(0), &[70.0, 80.0, 90.0]);
    record(&fx.registry, "total_buckets", &shard_ns(0), &[100u64, 110, 120]);

    fx.autoscaler.scale_listeners().await;
    fx.autoscaler.scale_assemblers().await;

    assert_eq!(fx.ingest.count(), 1);
    assert_eq!(fx.defrag.count(), 1);

    fx.shutdown().await;
}

#[tokio::test]
async fn test_rising_queue_depth_adds_processor() {
    let fx = Fixture::new().await;
    record(&fx.registry, "depth", &namespace::processor_queue(), &[0u64, 1, 2, 3, 4]);

    fx.autoscaler.scale_processors().await;
    assert_eq!(fx.processor.count(), 2);

    fx.shutdown().await;
}

#[tokio::test]
async fn test_defrag_pairs_follow_bucket_trend() {
    let fx = Fixture::new().await;
    record(&fx.registry, "total_buckets", &shard_ns(0), &[100u64, 106, 113, 120, 127]);

    fx.autoscaler.scale_assemblers().await;
    assert_eq!(fx.defrag.count(), 2);

    // Newer samples replace the rising ones; falling on both pairs removes one
    for id in fx.defrag.instance_ids() {
        record(&fx.registry, "total_buckets", &shard_ns(id), &[120u64, 118, 115, 110, 100]);
    }

    fx.autoscaler.scale_assemblers().await;
    assert_eq!(fx.defrag.count(), 1);

    fx.shutdown().await;
}

#[tokio::test]
async fn test_timeouts_lengthen_deadline() {
    let fx = Fixture::new().await;
    let ns = shard_ns(0);
    record(&fx.registry, "sum_time_between_fragments", &ns, &[1_000u64; 5]);
    record(&fx.registry, "push_ctn", &ns, &[100u64; 5]);
    record(&fx.registry, "timed_out_buckets", &ns, &[10u64; 5]);

    fx.autoscaler.scale_deadline();
    assert_eq!(fx.defrag.packet_deadline().get(), Duration::from_millis(110));

    fx.shutdown().await;
}

#[tokio::test]
async fn test_tightening_spacing_shortens_deadline() {
    let fx = Fixture::new().await;
    let ns = shard_ns(0);
    record(&fx.registry, "sum_time_between_fragments", &ns, &[5_000u64, 4_000, 3_000, 2_000, 1_000]);
    record(&fx.registry, "push_ctn", &ns, &[100u64; 5]);
    record(&fx.registry, "timed_out_buckets", &ns, &[0u64; 5]);

    fx.autoscaler.scale_deadline();
    assert_eq!(fx.defrag.packet_deadline().get(), Duration::from_millis(90));

    fx.shutdown().await;
}

#[tokio::test]
async fn test_deadline_never_leaves_bounds() {
    let fx = Fixture::new().await;
    fx.defrag.packet_deadline().set(Duration::from_millis(195));
    let ns = shard_ns(0);
    record(&fx.registry, "sum_time_between_fragments", &ns, &[0u64; 5]);
    record(&fx.registry, "push_ctn", &ns, &[10u64; 5]);
    record(&fx.registry, "timed_out_buckets", &ns, &[5u64; 5]);

    fx.autoscaler.scale_deadline();
    assert_eq!(fx.defrag.packet_deadline().get(), Duration::from_millis(200));
    fx.autoscaler.scale_deadline();
    assert_eq!(fx.defrag.packet_deadline().get(), Duration::from_millis(200));

    fx.shutdown().await;
}

#[tokio::test]
async fn test_scale_queues_shrinks_idle_queues() {
    let fx = Fixture::new().await;
    assert!(fx.processor.inbox().mutate_size(8).unwrap());
    // Moves the read side over once the old ring is empty
    assert!(fx.processor.inbox().try_pop().is_none());
    assert!(!fx.processor.inbox().is_migrating());

    fx.autoscaler.scale_queues();
    assert_eq!(fx.processor.inbox().capacity(), 4);

    fx.shutdown().await;
}
