//! Resizable queue built from two ring pointers
//!
//! # Migration
//!
//! ```text
//!   producers ──► active_write ──┐
//!                                ├── same ring while idle
//!   consumers ◄── active_read ───┘
//!
//!   mutate_size(n):
//!   producers ──► new ring (n slots)
//!   consumers ◄── old ring (draining) ── flipped to the new ring once
//!                                        no writer is inside it and it
//!                                        is empty
//! ```
//!
//! Producers register in the ring's writer count before checking the
//! draining flag, so a ring is only retired once no push can still land in
//! it. The consumer that observes the drained state swaps the read pointer
//! and wakes every other consumer parked on the old ring.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use sdsyslog_metrics::Metric;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Full, QueueError, Result};
use crate::metrics::QueueMetrics;
use crate::ring::Ring;

/// Smallest capacity the queue will shrink to by default
pub const DEFAULT_MIN_CAPACITY: usize = 2;

/// Largest capacity the queue will grow to by default
pub const DEFAULT_MAX_CAPACITY: usize = 1 << 20;

/// Poll period of [`Queue::push_blocking`] while the queue is full
const BLOCKING_PUSH_POLL: Duration = Duration::from_millis(10);

pub(crate) fn validate_capacity(capacity: usize) -> Result<()> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(QueueError::InvalidCapacity(capacity));
    }
    Ok(())
}

/// Multi-producer multi-consumer queue whose capacity can change while in use
pub struct Queue<T> {
    active_write: ArcSwap<Ring<T>>,
    active_read: ArcSwap<Ring<T>>,
    /// Woken when the read pointer moves to a new ring
    migrated: Notify,
    pub(crate) min_capacity: usize,
    pub(crate) max_capacity: usize,
    pub(crate) metrics: QueueMetrics,
}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("migrating", &self.is_migrating())
            .finish()
    }
}

impl<T> Queue<T> {
    /// Create a queue with default scaling bounds
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_bounds(
            capacity,
            DEFAULT_MIN_CAPACITY.min(capacity),
            DEFAULT_MAX_CAPACITY.max(capacity),
        )
    }

    /// Create a queue that [`scale_capacity`](Queue::scale_capacity) keeps
    /// within `min..=max`
    pub fn with_bounds(capacity: usize, min: usize, max: usize) -> Result<Self> {
        validate_capacity(capacity)?;
        if validate_capacity(min).is_err() || validate_capacity(max).is_err() || min > max {
            return Err(QueueError::InvalidBounds { min, max });
        }

        let ring = Arc::new(Ring::new(capacity));
        Ok(Self {
            active_write: ArcSwap::new(Arc::clone(&ring)),
            active_read: ArcSwap::new(ring),
            migrated: Notify::new(),
            min_capacity: min,
            max_capacity: max,
            metrics: QueueMetrics::default(),
        })
    }

    /// Append `value`. Never blocks; a full queue hands the value back.
    pub fn push(&self, value: T) -> std::result::Result<(), Full<T>> {
        let mut value = value;
        loop {
            let ring = self.active_write.load_full();
            if !ring.enter_writer() {
                // Lost a race with mutate_size; the new ring is already published
                std::thread::yield_now();
                continue;
            }

            let result = ring.try_push(value, &self.metrics);
            ring.exit_writer();

            match result {
                Ok(()) => return Ok(()),
                // A full ring that is being retired is not a full queue
                Err(rejected) if ring.is_draining() => value = rejected,
                Err(rejected) => return Err(Full(rejected)),
            }
        }
    }

    /// Push, retrying every 10ms while full, and account `size` bytes on
    /// success. Gives the value back if `cancel` fires first.
    pub async fn push_blocking(
        &self,
        cancel: &CancellationToken,
        value: T,
        size: u64,
    ) -> std::result::Result<(), Full<T>> {
        let mut value = value;
        loop {
            match self.push(value) {
                Ok(()) => {
                    self.metrics.bytes.add(size);
                    return Ok(());
                }
                Err(Full(rejected)) => value = rejected,
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Full(value)),
                _ = tokio::time::sleep(BLOCKING_PUSH_POLL) => {}
            }
        }
    }

    /// Take the oldest item, waiting until one arrives.
    ///
    /// An item that is already queued is returned even when `cancel` has
    /// fired; `None` only means cancellation while empty.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        self.metrics.pop_attempts.inc();

        loop {
            let ring = self.active_read.load_full();

            // Register for wakeups before looking, so a push or migration
            // landing between the check and the await is not missed
            let not_empty = ring.not_empty.notified();
            let migrated = self.migrated.notified();
            tokio::pin!(not_empty, migrated);
            not_empty.as_mut().enable();
            migrated.as_mut().enable();

            if let Some(value) = ring.try_pop(&self.metrics) {
                if ring.is_drained() {
                    self.finish_migration(&ring);
                }
                return Some(value);
            }

            if ring.is_drained() {
                self.finish_migration(&ring);
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = &mut not_empty => {}
                _ = &mut migrated => {}
            }
        }
    }

    /// Non-waiting pop
    pub fn try_pop(&self) -> Option<T> {
        loop {
            let ring = self.active_read.load_full();
            if let Some(value) = ring.try_pop(&self.metrics) {
                if ring.is_drained() {
                    self.finish_migration(&ring);
                }
                return Some(value);
            }
            if !ring.is_drained() {
                return None;
            }
            self.finish_migration(&ring);
        }
    }

    /// Move the read pointer off a drained ring. Only one caller wins.
    fn finish_migration(&self, drained: &Arc<Ring<T>>) {
        let target = self.active_write.load_full();
        if Arc::ptr_eq(drained, &target) {
            return;
        }

        let previous = self.active_read.compare_and_swap(drained, target);
        if Arc::ptr_eq(&*previous, drained) {
            debug!(capacity = self.capacity(), "queue migration complete");
            self.migrated.notify_waiters();
        }
    }

    /// Start moving to a ring of `capacity` slots.
    ///
    /// Returns `Ok(false)` without doing anything while a previous migration
    /// is still draining. Items already queued stay in order ahead of
    /// anything pushed afterwards.
    pub fn mutate_size(&self, capacity: usize) -> Result<bool> {
        validate_capacity(capacity)?;

        let read = self.active_read.load_full();
        let write = self.active_write.load_full();
        if !Arc::ptr_eq(&read, &write) {
            return Ok(false);
        }

        let next = Arc::new(Ring::new(capacity));
        let previous = self.active_write.compare_and_swap(&write, next);
        if !Arc::ptr_eq(&*previous, &write) {
            // Another resize won
            return Ok(false);
        }

        write.start_draining();
        debug!(from = write.capacity(), to = capacity, "queue migration started");
        Ok(true)
    }

    /// Items queued across the draining and active rings
    pub fn len(&self) -> usize {
        let read = self.active_read.load();
        let write = self.active_write.load();
        if Arc::ptr_eq(&*read, &*write) {
            read.len()
        } else {
            read.len() + write.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of the ring producers currently write to
    pub fn capacity(&self) -> usize {
        self.active_write.load().capacity()
    }

    /// Whether a previous resize is still draining
    pub fn is_migrating(&self) -> bool {
        !Arc::ptr_eq(&*self.active_read.load(), &*self.active_write.load())
    }

    /// Add to the estimated byte total (done by `push_blocking` itself)
    pub fn record_bytes(&self, size: u64) {
        self.metrics.bytes.add(size);
    }

    /// Remove a popped item's size from the byte total, saturating at zero
    pub fn release_bytes(&self, size: u64) {
        if !self.metrics.bytes.sub_saturating(size, 4) {
            self.metrics.bytes.set(self.metrics.bytes.get().saturating_sub(size));
        }
    }

    pub fn bytes(&self) -> u64 {
        self.metrics.bytes.get()
    }

    /// Gauges plus read-and-reset counters under `namespace`
    pub fn collect_metrics(&self, namespace: &[String], interval: Duration) -> Vec<Metric> {
        self.metrics.collect(self.len() as u64, namespace, interval)
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
