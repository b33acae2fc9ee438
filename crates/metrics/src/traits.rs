//! Metrics provider trait
//!
//! Pipeline components (queues, shards, workers) implement this trait so the
//! gatherer can collect a round from each of them without knowing the
//! concrete types.
//!
//! # Design
//!
//! - Collection takes `&self`; interval counters are atomics read and reset
//!   with a swap, so no locks are needed
//! - All providers are `Send + Sync` for collection from a background task

use std::time::Duration;

use crate::Metric;

/// A component that publishes metrics once per collection interval
pub trait MetricsProvider: Send + Sync {
    /// Read (and reset interval counters of) this component's metrics.
    ///
    /// `interval` is the measurement window recorded on every metric and
    /// used for rate-style values such as busy time percentages.
    fn collect_metrics(&self, interval: Duration) -> Vec<Metric>;
}
