//! Processor worker - decodes raw packets and routes the fragments

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use sdsyslog_metrics::{Counter, Metric, MetricKind, MetricsProvider};
use sdsyslog_protocol::FragmentDecoder;
use sdsyslog_queue::Queue;

use super::{ElapsedStats, RawPacket, guarded};
use crate::error::Result;
use crate::namespace;
use crate::routing::{RoutingView, route_fragment};

/// Processor counters
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    pub valid_payloads: Counter,
    /// Failed to decode or validate
    pub invalid_payloads: Counter,
    pub routing_failures: Counter,
    pub elapsed: ElapsedStats,
}

/// Pops raw packets, decodes them and routes each fragment to a shard
pub struct Processor {
    namespace: Vec<String>,
    inbox: Arc<Queue<RawPacket>>,
    decoder: Arc<dyn FragmentDecoder>,
    routing: Arc<dyn RoutingView>,
    metrics: ProcessorMetrics,
}

impl Processor {
    pub fn new(
        prefix: &[String],
        inbox: Arc<Queue<RawPacket>>,
        decoder: Arc<dyn FragmentDecoder>,
        routing: Arc<dyn RoutingView>,
    ) -> Self {
        Self {
            namespace: namespace::child(prefix, namespace::WORKER),
            inbox,
            decoder,
            routing,
            metrics: ProcessorMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &ProcessorMetrics {
        &self.metrics
    }

    pub async fn run(&self, cancel: CancellationToken) {
        debug!(namespace = %self.namespace.join("/"), "processor started");

        loop {
            let packet = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                packet = self.inbox.pop(&cancel) => match packet {
                    Some(packet) => packet,
                    None => break,
                },
            };

            if let Err(e) = guarded(self.process(&cancel, packet)).await {
                error!(namespace = %self.namespace.join("/"), error = %e, "processor iteration failed");
            }
        }

        debug!(namespace = %self.namespace.join("/"), "processor stopped");
    }

    /// Decode and route one packet.
    ///
    /// The packet deadline is measured from here, not from when the packet
    /// was received, so time spent queued does not count. Decode failures are counted and swallowed; only routing errors are
    /// returned.
    pub(crate) async fn process(&self, cancel: &CancellationToken, packet: RawPacket) -> Result<()> {
        let start = Instant::now();
        self.inbox.release_bytes(packet.size());

        let mut fragment = match self.decoder.decode(&packet.data) {
            Ok(fragment) => fragment,
            Err(e) => {
                self.metrics.invalid_payloads.inc();
                debug!(remote_ip = %packet.remote_ip, error = %e, "dropping undecodable packet");
                return Ok(());
            }
        };

        let remote_ip = packet.remote_ip.to_string();
        fragment.remote_ip.clone_from(&remote_ip);

        if let Err(e) = route_fragment(cancel, self.routing.as_ref(), &remote_ip, fragment, start).await {
            self.metrics.routing_failures.inc();
            return Err(e);
        }

        self.metrics.valid_payloads.inc();
        self.metrics.elapsed.record(start);
        Ok(())
    }
}

impl MetricsProvider for Processor {
    fn collect_metrics(&self, interval: Duration) -> Vec<Metric> {
        let ns = &self.namespace;
        let valid = self.metrics.valid_payloads.take();
        let (avg_ns, max_ns) = self.metrics.elapsed.take(valid);

        vec![
            Metric::new("valid_payloads", "Fragments routed to a shard", ns, MetricKind::Counter, valid, "count", interval),
            Metric::new(
                "invalid_payloads",
                "Packets that failed to decode",
                ns,
                MetricKind::Counter,
                self.metrics.invalid_payloads.take(),
                "count",
                interval,
            ),
            Metric::new(
                "routing_failures",
                "Fragments that could not be routed",
                ns,
                MetricKind::Counter,
                self.metrics.routing_failures.take(),
                "count",
                interval,
            ),
            Metric::new("average_process_ns", "Average time to decode and route", ns, MetricKind::Summary, avg_ns, "ns", interval),
            Metric::new("max_process_ns", "Longest time to decode and route", ns, MetricKind::Summary, max_ns, "ns", interval),
        ]
    }
}
