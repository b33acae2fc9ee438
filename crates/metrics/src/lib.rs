//! SDSyslog - Metrics
//!
//! Internal metrics collection, storage and the statistics the autoscaler
//! runs over them.
//!
//! # Overview
//!
//! This crate provides:
//! - Atomic [`Counter`]s that pipeline components update on the hot path
//! - The [`MetricsProvider`] trait components implement to publish a
//!   collection round
//! - A time-sliced [`Registry`] holding every collection round until pruned
//! - Robust statistics ([`trimmed_mean_u64`], [`regression_slope`]) used for
//!   trend detection
//! - [`wait_until_zero`], the bounded drain wait used during instance removal
//!
//! # Design Principles
//!
//! - **Lock-free updates**: Components only touch atomics while running
//! - **Read and clear**: Interval counters are swapped to zero on collection,
//!   so every registry entry describes exactly one interval
//! - **Namespaced**: Every metric carries a path such as
//!   `Receiver/Defrag/3/Queue`, and searches match on namespace prefixes
//!
//! # Registry Layout
//!
//! ```text
//! time slice (truncated to interval)
//!     └── namespace ("Receiver/Ingest/0/Listener")
//!             └── metric name ("busy_time_percent") → Metric
//! ```
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use chrono::Utc;
//! use sdsyslog_metrics::{Metric, MetricKind, Registry};
//!
//! let registry = Registry::new();
//! let interval = Duration::from_secs(15);
//! let slice = registry.new_time_slice(Utc::now(), interval);
//!
//! let ns = vec!["Receiver".to_string(), "Output".to_string(), "Queue".to_string()];
//! registry.add(slice, vec![Metric::new("depth", "Items waiting", &ns, MetricKind::Gauge, 12u64, "count", interval)]);
//!
//! let found = registry.search("depth", &ns, None, None);
//! assert_eq!(found.len(), 1);
//! ```

mod atomics;
mod error;
mod metric;
mod registry;
mod stats;
mod traits;

pub use atomics::wait_until_zero;
pub use error::{MetricsError, Result};
pub use metric::{Metric, MetricKind, MetricValue, Raw, namespace};
pub use registry::{Aggregation, DiscoverFilter, Registry};
pub use stats::{Scale, mean, regression_slope, trimmed_mean_f64, trimmed_mean_u64};
pub use traits::MetricsProvider;

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter wrapper for convenient metric operations
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Create a new counter initialized to 0
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increment the counter by `val` (relaxed ordering for performance)
    #[inline]
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Increment the counter by 1
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    /// Get the current value (relaxed ordering)
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Overwrite the current value
    #[inline]
    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    /// Reset the counter to 0 and return the previous value
    #[inline]
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }

    /// Raise the stored value to `val` if it is larger
    #[inline]
    pub fn record_max(&self, val: u64) {
        self.0.fetch_max(val, Ordering::Relaxed);
    }

    /// Subtract `val` without wrapping below zero.
    ///
    /// Retries the compare-and-swap up to `max_retries` extra times under
    /// contention. Returns `false` when the subtraction could not be applied,
    /// either because the counter holds less than `val` or because every
    /// attempt lost the race. Callers that own an authoritative count
    /// (a map length, a channel length) re-sync with [`Counter::set`].
    pub fn sub_saturating(&self, val: u64, max_retries: usize) -> bool {
        for _ in 0..=max_retries {
            let current = self.0.load(Ordering::Acquire);
            if current < val {
                return false;
            }
            if self
                .0
                .compare_exchange(current, current - val, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
        false
    }
}
