//! Shard metrics

use std::time::Duration;

use sdsyslog_metrics::{Counter, Metric, MetricKind};

/// Shard counters; gauges are live, the rest reset on collection
#[derive(Debug, Default)]
pub struct ShardMetrics {
    /// Estimated bytes of stored fragments
    pub bytes: Counter,
    /// Buckets currently held, filled or not
    pub total_buckets: Counter,
    /// Filled buckets whose key has not been taken by the assembler
    pub waiting_buckets: Counter,
    pub timed_out_buckets: Counter,
    /// Sum of processing-start spacing between consecutive fragments of a
    /// bucket
    pub fragment_spacing_ns: Counter,
    pub push_count: Counter,
    pub pop_count: Counter,
}

impl ShardMetrics {
    pub(crate) fn collect(&self, namespace: &[String], interval: Duration) -> Vec<Metric> {
        let total_buckets = self.total_buckets.get();
        let waiting_buckets = self.waiting_buckets.get();
        let timed_out = self.timed_out_buckets.take();
        let spacing = self.fragment_spacing_ns.take();
        let pops = self.pop_count.take();
        let pushes = self.push_count.take();

        // Push count is effectively the fragment count
        let avg_spacing = if pushes > 0 { spacing / pushes } else { 0 };

        let metric = |name, desc, kind, value: u64, unit| {
            Metric::new(name, desc, namespace, kind, value, unit, interval)
        };

        vec![
            metric(
                "total_buckets",
                "Buckets currently in the shard, not counting ones waiting for assembly",
                MetricKind::Gauge,
                total_buckets,
                "count",
            ),
            metric(
                "waiting_buckets",
                "Filled buckets waiting for the assembler",
                MetricKind::Gauge,
                waiting_buckets,
                "count",
            ),
            metric(
                "timed_out_buckets",
                "Buckets closed by the packet deadline in the interval",
                MetricKind::Counter,
                timed_out,
                "count",
            ),
            metric(
                "sum_time_between_fragments",
                "Sum of time between fragments of the same message in the interval",
                MetricKind::Counter,
                spacing,
                "ns",
            ),
            metric(
                "average_time_between_fragments",
                "Average time between fragments of the same message in the interval",
                MetricKind::Summary,
                avg_spacing,
                "ns",
            ),
            metric(
                "push_ctn",
                "Fragments pushed into the shard in the interval",
                MetricKind::Counter,
                pushes,
                "count",
            ),
            metric(
                "pop_ctn",
                "Bucket keys taken from the shard in the interval",
                MetricKind::Counter,
                pops,
                "count",
            ),
        ]
    }
}
