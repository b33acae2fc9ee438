//! Queue counters

use std::time::Duration;

use sdsyslog_metrics::{Counter, Metric, MetricKind};

/// Hot-path counters shared by every ring a queue migrates through
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Estimated bytes held, maintained by callers that know item sizes
    pub bytes: Counter,
    pub push_attempts: Counter,
    pub push_success: Counter,
    pub push_cas_retries: Counter,
    pub pop_attempts: Counter,
    pub pop_success: Counter,
    pub pop_cas_retries: Counter,
}

impl QueueMetrics {
    /// Snapshot gauges and read-and-reset the interval counters
    pub(crate) fn collect(&self, depth: u64, namespace: &[String], interval: Duration) -> Vec<Metric> {
        let gauge = |name: &str, desc: &str, value: u64, unit: &str| {
            Metric::new(name, desc, namespace, MetricKind::Gauge, value, unit, interval)
        };
        let counter = |name: &str, desc: &str, c: &Counter| {
            Metric::new(name, desc, namespace, MetricKind::Counter, c.take(), "count", interval)
        };

        vec![
            gauge("depth", "Items currently queued", depth, "count"),
            gauge("byte_sum", "Estimated bytes currently queued", self.bytes.get(), "bytes"),
            counter("push_attempts", "Push calls", &self.push_attempts),
            counter("push_success", "Pushes that stored an item", &self.push_success),
            counter("push_cas_retries", "Tail compare-and-swap retries", &self.push_cas_retries),
            counter("pop_attempts", "Pop calls", &self.pop_attempts),
            counter("pop_success", "Pops that returned an item", &self.pop_success),
            counter("pop_cas_retries", "Head compare-and-swap retries", &self.pop_cas_retries),
        ]
    }
}
