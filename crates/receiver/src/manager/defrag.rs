//! Defrag manager - shard and assembler pairs
//!
//! Routing indexes the ordered pair list, so the list and the override table
//! live together in [`RoutingState`]. Removing a pair shifts every later
//! index down by one; overrides are re-indexed in the same step.
//!
//! # Pair Removal
//!
//! ```text
//! start_shutdown ──► new streams routed elsewhere (overrides)
//!       │
//!       ▼
//! wait: total_buckets == 0, waiting_buckets == 0   (bounded)
//!       │
//!       ▼
//! cancel watcher + assembler ──► drop from list ──► re-index overrides
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sdsyslog_config::DefragConfig;
use sdsyslog_metrics::{Metric, MetricsProvider, wait_until_zero};
use sdsyslog_protocol::Payload;
use sdsyslog_queue::Queue;

use crate::namespace;
use crate::routing::{OverrideCleaner, RoutingView};
use crate::shard::{PacketDeadline, Shard};
use crate::worker::Assembler;

/// A shard with its assembler and timeout watcher
pub struct InstancePair {
    id: usize,
    shard: Arc<Shard>,
    assembler: Arc<Assembler>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl InstancePair {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn shard(&self) -> &Arc<Shard> {
        &self.shard
    }

    async fn stop(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(id = self.id, error = %e, "defrag task ended abnormally");
            }
        }
    }
}

/// The ordered pair list plus bucket overrides
#[derive(Default)]
pub struct RoutingState {
    pairs: RwLock<Vec<Arc<InstancePair>>>,
    overrides: Mutex<HashMap<String, usize>>,
}

impl RoutingState {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, pair: Arc<InstancePair>) {
        self.pairs.write().push(pair);
    }

    fn find(&self, id: usize) -> Option<Arc<InstancePair>> {
        self.pairs.read().iter().find(|p| p.id == id).cloned()
    }

    fn pairs(&self) -> Vec<Arc<InstancePair>> {
        self.pairs.read().clone()
    }

    /// Drop a pair from the list and shift overrides past it down by one.
    /// Overrides still pointing at the removed pair are dropped.
    fn remove(&self, id: usize) -> Option<Arc<InstancePair>> {
        let mut pairs = self.pairs.write();
        let index = pairs.iter().position(|p| p.id == id)?;
        let pair = pairs.remove(index);

        self.overrides.lock().retain(|_, target| {
            if *target == index {
                return false;
            }
            if *target > index {
                *target -= 1;
            }
            true
        });

        Some(pair)
    }

    /// Number of overrides currently recorded
    pub fn override_count(&self) -> usize {
        self.overrides.lock().len()
    }
}

impl RoutingView for RoutingState {
    fn shard_count(&self) -> usize {
        self.pairs.read().len()
    }

    fn shard(&self, index: usize) -> Option<Arc<Shard>> {
        self.pairs.read().get(index).map(|p| Arc::clone(&p.shard))
    }

    fn is_shard_shutdown(&self, index: usize) -> bool {
        self.pairs.read().get(index).is_some_and(|p| p.shard.is_shutdown())
    }

    fn bucket_exists(&self, index: usize, bucket_key: &str) -> bool {
        self.pairs.read().get(index).is_some_and(|p| p.shard.contains(bucket_key))
    }

    fn override_for(&self, bucket_key: &str) -> Option<usize> {
        self.overrides.lock().get(bucket_key).copied()
    }

    fn set_override(&self, bucket_key: &str, index: usize) {
        self.overrides.lock().insert(bucket_key.to_string(), index);
    }

    fn find_alternative_shard(&self, orig: usize) -> usize {
        self.pairs
            .read()
            .iter()
            .enumerate()
            .find(|(i, p)| *i != orig && !p.shard.is_shutdown())
            .map_or(orig, |(i, _)| i)
    }
}

impl OverrideCleaner for RoutingState {
    fn clear_override(&self, bucket_key: &str) {
        self.overrides.lock().remove(bucket_key);
    }
}

/// Starts and stops shard and assembler pairs
pub struct DefragManager {
    routing: Arc<RoutingState>,
    outbox: Arc<Queue<Payload>>,
    deadline: Arc<PacketDeadline>,
    shard_buffer: usize,
    watcher_interval: Duration,
    drain_timeout: Duration,
    min: usize,
    max: usize,
    cancel: CancellationToken,
    next_id: Mutex<usize>,
    /// Serializes add and remove
    scaling: tokio::sync::Mutex<()>,
}

impl DefragManager {
    pub fn new(
        config: &DefragConfig,
        outbox: Arc<Queue<Payload>>,
        shard_buffer: usize,
        drain_timeout: Duration,
        min: usize,
        max: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            routing: Arc::new(RoutingState::new()),
            outbox,
            deadline: Arc::new(PacketDeadline::new(config.packet_deadline)),
            shard_buffer,
            watcher_interval: config.watcher_interval,
            drain_timeout,
            min,
            max,
            cancel,
            next_id: Mutex::new(0),
            scaling: tokio::sync::Mutex::new(()),
        }
    }

    /// Routing state for processors
    pub fn routing(&self) -> Arc<RoutingState> {
        Arc::clone(&self.routing)
    }

    /// Reassembly deadline shared by every shard
    pub fn packet_deadline(&self) -> &Arc<PacketDeadline> {
        &self.deadline
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Start a shard with its watcher and assembler
    pub async fn add_instance(&self) -> usize {
        let _guard = self.scaling.lock().await;

        let id = {
            let mut next_id = self.next_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };

        let prefix = namespace::defrag_pair(id);
        let shard = Arc::new(Shard::new(&prefix, self.shard_buffer, Arc::clone(&self.deadline)));
        let assembler = Arc::new(Assembler::new(
            &prefix,
            Arc::clone(&shard),
            Arc::clone(&self.outbox),
            self.routing.clone(),
        ));
        let cancel = self.cancel.child_token();

        let watcher = {
            let shard = Arc::clone(&shard);
            let cancel = cancel.clone();
            let tick = self.watcher_interval;
            tokio::spawn(async move { shard.run_timeout_watcher(cancel, tick).await })
        };
        let assembling = {
            let assembler = Arc::clone(&assembler);
            let cancel = cancel.clone();
            tokio::spawn(async move { assembler.run(cancel).await })
        };

        self.routing.push(Arc::new(InstancePair {
            id,
            shard,
            assembler,
            cancel,
            tasks: Mutex::new(vec![watcher, assembling]),
        }));

        info!(id, "started defrag pair");
        id
    }

    /// Drain and stop a pair. Returns whether it existed.
    ///
    /// New message streams stop arriving at once; streams already in the
    /// shard get until the drain timeout to complete or expire. Buckets
    /// still present after that are dropped and logged.
    pub async fn remove_instance(&self, id: usize) -> bool {
        let _guard = self.scaling.lock().await;

        let Some(pair) = self.routing.find(id) else {
            return false;
        };
        pair.shard.start_shutdown();

        let metrics = pair.shard.metrics();
        let (drained, left) = wait_until_zero(|| metrics.total_buckets.get(), self.drain_timeout).await;
        if !drained {
            warn!(id, dropped = left, "shard did not drain before timeout, dropping buckets");
        }
        let (drained, left) = wait_until_zero(|| metrics.waiting_buckets.get(), self.drain_timeout).await;
        if !drained {
            warn!(id, dropped = left, "assembler did not drain before timeout, dropping buckets");
        }

        pair.stop().await;
        self.routing.remove(id);

        info!(id, "stopped defrag pair");
        true
    }

    /// Remove every pair, one at a time
    pub async fn remove_all(&self) {
        for id in self.instance_ids() {
            self.remove_instance(id).await;
        }
    }

    pub fn instance_ids(&self) -> Vec<usize> {
        self.routing.pairs.read().iter().map(|p| p.id).collect()
    }

    pub fn count(&self) -> usize {
        self.routing.shard_count()
    }
}

impl MetricsProvider for DefragManager {
    fn collect_metrics(&self, interval: Duration) -> Vec<Metric> {
        self.routing
            .pairs()
            .iter()
            .flat_map(|p| {
                let mut metrics = p.shard.collect_metrics(interval);
                metrics.extend(p.assembler.collect_metrics(interval));
                metrics
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "defrag_test.rs"]
mod tests;
