//! Assembler worker - turns filled buckets into whole messages
//!
//! Paired one to one with a shard. Waits for ready keys, drains the bucket,
//! joins its fragments and hands the result to the output queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use sdsyslog_metrics::{Counter, Metric, MetricKind, MetricsProvider};
use sdsyslog_protocol::{Payload, defragment};
use sdsyslog_queue::Queue;

use super::{ElapsedStats, guarded};
use crate::error::{ReceiverError, Result};
use crate::namespace;
use crate::routing::OverrideCleaner;
use crate::shard::Shard;

/// Attempts to push a message onto a full output queue
const OUTPUT_PUSH_ATTEMPTS: usize = 4;
/// Pause between output push attempts
const OUTPUT_PUSH_BACKOFF: Duration = Duration::from_millis(5);

/// Assembler counters
#[derive(Debug, Default)]
pub struct AssemblerMetrics {
    pub processed_buckets: Counter,
    pub elapsed: ElapsedStats,
}

/// Reassembles the buckets of one shard
pub struct Assembler {
    namespace: Vec<String>,
    shard: Arc<Shard>,
    outbox: Arc<Queue<Payload>>,
    overrides: Arc<dyn OverrideCleaner>,
    metrics: AssemblerMetrics,
}

impl Assembler {
    pub fn new(
        prefix: &[String],
        shard: Arc<Shard>,
        outbox: Arc<Queue<Payload>>,
        overrides: Arc<dyn OverrideCleaner>,
    ) -> Self {
        Self {
            namespace: namespace::child(prefix, namespace::ASSEMBLER),
            shard,
            outbox,
            overrides,
            metrics: AssemblerMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &AssemblerMetrics {
        &self.metrics
    }

    pub async fn run(&self, cancel: CancellationToken) {
        debug!(namespace = %self.namespace.join("/"), "assembler started");

        loop {
            let key = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                key = self.shard.pop_key(&cancel) => match key {
                    Some(key) => key,
                    None => break,
                },
            };

            if let Err(e) = guarded(self.assemble(&key)).await {
                error!(namespace = %self.namespace.join("/"), bucket = %key, error = %e, "assembler iteration failed");
            }
        }

        debug!(namespace = %self.namespace.join("/"), "assembler stopped");
    }

    /// Drain, join and forward one bucket
    pub(crate) async fn assemble(&self, key: &str) -> Result<()> {
        let start = Instant::now();

        let bucket = self.shard.drain_bucket(key);
        self.overrides.clear_override(key);

        let Some(bucket) = bucket else {
            debug!(bucket = %key, "ready key without a bucket");
            return Ok(());
        };

        let complete = bucket.is_complete();
        let message = defragment(bucket.into_fragments())?;
        if !complete {
            debug!(bucket = %key, "forwarding incomplete message");
        }

        self.forward(message).await?;

        self.metrics.processed_buckets.inc();
        self.metrics.elapsed.record(start);
        Ok(())
    }

    async fn forward(&self, message: Payload) -> Result<()> {
        let (host_id, log_id) = (message.host_id, message.log_id);
        let size = message.size() as u64;
        let mut message = message;

        for attempt in 1..=OUTPUT_PUSH_ATTEMPTS {
            match self.outbox.push(message) {
                Ok(()) => {
                    self.outbox.record_bytes(size);
                    return Ok(());
                }
                Err(full) => message = full.into_inner(),
            }
            if attempt < OUTPUT_PUSH_ATTEMPTS {
                tokio::time::sleep(OUTPUT_PUSH_BACKOFF).await;
            }
        }

        warn!(host_id, log_id, "output queue full, dropping message");
        Err(ReceiverError::OutputFull { host_id, log_id })
    }
}

impl MetricsProvider for Assembler {
    fn collect_metrics(&self, interval: Duration) -> Vec<Metric> {
        let ns = &self.namespace;
        let processed = self.metrics.processed_buckets.take();
        let (avg_ns, max_ns) = self.metrics.elapsed.take(processed);

        vec![
            Metric::new("processed_buckets", "Buckets reassembled", ns, MetricKind::Counter, processed, "count", interval),
            Metric::new(
                "average_elapsed_ns",
                "Average time to reassemble a bucket",
                ns,
                MetricKind::Summary,
                avg_ns,
                "ns",
                interval,
            ),
            Metric::new("max_elapsed_ns", "Longest time to reassemble a bucket", ns, MetricKind::Summary, max_ns, "ns", interval),
        ]
    }
}
