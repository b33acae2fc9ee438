//! Defrag shard - fragment buckets awaiting reassembly
//!
//! A shard owns a map of buckets, one per in-flight message stream, keyed by
//! `"{ip}-{host_id}-{log_id}"`. Fragments accumulate until the bucket holds
//! every sequence number or its packet deadline passes. The bucket is then
//! marked filled and its key is sent to the shard's ready channel, where the
//! paired assembler picks it up.
//!
//! # Bucket Lifecycle
//!
//! ```text
//! first fragment ──► accumulating ──► filled ──► drained
//!                         │             ▲
//!                         └─ deadline ──┘
//! ```
//!
//! `filled` is set under the map lock, so a key is sent at most once no
//! matter whether completion or the deadline wins.

mod metrics;
mod trend;
mod watcher;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossfire::{MAsyncRx, MAsyncTx, mpmc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use sdsyslog_metrics::{Metric, MetricsProvider};
use sdsyslog_protocol::Payload;

use crate::{namespace, nanos};

pub use metrics::ShardMetrics;
pub use trend::{trend, trend_latency};

/// Retries for counter decrements that race with other updates
const SUB_RETRIES: usize = 64;

/// Reassembly deadline shared by every shard of a defrag manager.
///
/// Written by the autoscaler, read on every push and watcher tick.
#[derive(Debug)]
pub struct PacketDeadline(AtomicU64);

impl PacketDeadline {
    pub fn new(deadline: Duration) -> Self {
        Self(AtomicU64::new(nanos(deadline)))
    }

    #[inline]
    pub fn get(&self) -> Duration {
        Duration::from_nanos(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, deadline: Duration) {
        self.0.store(nanos(deadline), Ordering::Release);
    }
}

/// Fragments of one message stream
#[derive(Debug)]
pub struct Bucket {
    filled: bool,
    fragments: BTreeMap<u16, Payload>,
    /// Fixed by the first fragment received
    max_seq: u16,
    /// Processing start of the newest fragment; the bucket's modified time
    last_process_start: Instant,
}

impl Bucket {
    fn new(max_seq: u16, started: Instant) -> Self {
        Self {
            filled: false,
            fragments: BTreeMap::new(),
            max_seq,
            last_process_start: started,
        }
    }

    pub fn max_seq(&self) -> u16 {
        self.max_seq
    }

    /// Number of distinct fragments held
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.fragments.len() == usize::from(self.max_seq) + 1
    }

    /// Fragments in sequence order
    pub fn into_fragments(self) -> Vec<Payload> {
        self.fragments.into_values().collect()
    }

    fn size(&self) -> u64 {
        self.fragments.values().map(|f| f.size() as u64).sum()
    }
}

/// One bucket store with its ready-key channel
pub struct Shard {
    namespace: Vec<String>,
    buckets: Mutex<HashMap<String, Bucket>>,
    ready_tx: MAsyncTx<String>,
    ready_rx: MAsyncRx<String>,
    deadline: Arc<PacketDeadline>,
    in_shutdown: AtomicBool,
    metrics: ShardMetrics,
}

impl Shard {
    /// Create a shard publishing metrics under `prefix` + `Queue`.
    ///
    /// `buffer` bounds the ready-key channel; a full channel makes pushes
    /// that complete a bucket wait for the assembler.
    pub fn new(prefix: &[String], buffer: usize, deadline: Arc<PacketDeadline>) -> Self {
        let (ready_tx, ready_rx) = mpmc::bounded_async(buffer.max(1));
        Self {
            namespace: namespace::child(prefix, namespace::QUEUE),
            buckets: Mutex::new(HashMap::new()),
            ready_tx,
            ready_rx,
            deadline,
            in_shutdown: AtomicBool::new(false),
            metrics: ShardMetrics::default(),
        }
    }

    pub fn namespace(&self) -> &[String] {
        &self.namespace
    }

    pub fn metrics(&self) -> &ShardMetrics {
        &self.metrics
    }

    pub fn packet_deadline(&self) -> Duration {
        self.deadline.get()
    }

    pub fn is_shutdown(&self) -> bool {
        self.in_shutdown.load(Ordering::Acquire)
    }

    /// Stop routing new message streams here. Buckets already present keep
    /// receiving their fragments.
    pub fn start_shutdown(&self) {
        self.in_shutdown.store(true, Ordering::Release);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.buckets.lock().contains_key(key)
    }

    /// Add a fragment to its bucket.
    ///
    /// Fragments for a filled bucket, with a `message_seq_max` different from
    /// the bucket's first fragment, or repeating a sequence number already
    /// held are dropped. A fragment whose processing started longer than the
    /// packet deadline ago closes its bucket without being stored.
    pub async fn push(&self, cancel: &CancellationToken, key: &str, fragment: Payload, started: Instant) {
        self.metrics.push_count.inc();

        let ready = {
            let mut buckets = self.buckets.lock();

            let existed = match buckets.get(key) {
                Some(b) if b.filled || b.max_seq != fragment.message_seq_max => return,
                Some(_) => true,
                None => false,
            };

            let bucket = buckets
                .entry(key.to_string())
                .or_insert_with(|| Bucket::new(fragment.message_seq_max, started));

            if existed {
                let spacing = started.saturating_duration_since(bucket.last_process_start);
                self.metrics.fragment_spacing_ns.add(nanos(spacing));
            } else {
                self.metrics.total_buckets.inc();
            }

            bucket.last_process_start = started;

            if started.elapsed() > self.deadline.get() {
                bucket.filled = true;
                self.metrics.timed_out_buckets.inc();
                true
            } else {
                if !bucket.fragments.contains_key(&fragment.message_seq) {
                    self.metrics.bytes.add(fragment.size() as u64);
                    bucket.fragments.insert(fragment.message_seq, fragment);
                }
                bucket.filled = bucket.is_complete();
                bucket.filled
            }
        };

        if ready {
            self.enqueue(cancel, key.to_string()).await;
        }
    }

    /// Wait for the next filled bucket's key.
    ///
    /// On cancellation `waiting_buckets` is reset to the number of keys
    /// still queued.
    pub async fn pop_key(&self, cancel: &CancellationToken) -> Option<String> {
        self.metrics.pop_count.inc();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.metrics.waiting_buckets.set(self.ready_rx.len() as u64);
                None
            }
            received = self.ready_rx.recv() => {
                let key = received.ok()?;
                if !self.metrics.waiting_buckets.sub_saturating(1, SUB_RETRIES) {
                    warn!(namespace = %self.namespace.join("/"), "waiting bucket count out of sync");
                }
                Some(key)
            }
        }
    }

    /// Remove a bucket for reassembly
    pub fn drain_bucket(&self, key: &str) -> Option<Bucket> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.remove(key)?;

        self.metrics.bytes.sub_saturating(bucket.size(), SUB_RETRIES);
        if !self.metrics.total_buckets.sub_saturating(1, SUB_RETRIES) {
            warn!(namespace = %self.namespace.join("/"), "total bucket count out of sync");
            self.metrics.total_buckets.set(buckets.len() as u64);
        }

        Some(bucket)
    }

    /// Mark every open bucket idle for longer than the deadline as filled
    /// and return their keys
    fn expire_stale(&self) -> Vec<String> {
        let deadline = self.deadline.get();
        let mut buckets = self.buckets.lock();

        let mut expired = Vec::new();
        for (key, bucket) in buckets.iter_mut() {
            if !bucket.filled && bucket.last_process_start.elapsed() > deadline {
                bucket.filled = true;
                self.metrics.timed_out_buckets.inc();
                expired.push(key.clone());
            }
        }
        expired
    }

    /// Hand a filled bucket's key to the assembler.
    ///
    /// Counted as waiting before the send so drain checks never see a key
    /// in flight as absent.
    async fn enqueue(&self, cancel: &CancellationToken, key: String) {
        self.metrics.waiting_buckets.inc();

        let sent = tokio::select! {
            biased;
            result = self.ready_tx.send(key) => result.is_ok(),
            _ = cancel.cancelled() => false,
        };

        if !sent {
            self.metrics.waiting_buckets.sub_saturating(1, SUB_RETRIES);
        }
    }
}

impl MetricsProvider for Shard {
    fn collect_metrics(&self, interval: Duration) -> Vec<Metric> {
        self.metrics.collect(&self.namespace, interval)
    }
}

#[cfg(test)]
#[path = "shard_test.rs"]
mod tests;
