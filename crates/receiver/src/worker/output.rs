//! Output worker - writes whole messages to the configured sinks

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use sdsyslog_metrics::{Counter, Metric, MetricKind, MetricsProvider};
use sdsyslog_protocol::Payload;
use sdsyslog_queue::Queue;

use super::{MessageSink, guarded_sync};
use crate::error::Result;

/// Output counters
#[derive(Debug, Default)]
pub struct OutputMetrics {
    pub received_messages: Counter,
    /// Per-sink writes
    pub successful_writes: Counter,
    pub failed_writes: Counter,
}

/// Pops messages off the output queue and fans them out to every sink
pub struct OutputWorker {
    namespace: Vec<String>,
    inbox: Arc<Queue<Payload>>,
    sinks: Mutex<Vec<Box<dyn MessageSink>>>,
    flush_interval: Duration,
    metrics: OutputMetrics,
}

impl OutputWorker {
    pub fn new(
        namespace: Vec<String>,
        inbox: Arc<Queue<Payload>>,
        sinks: Vec<Box<dyn MessageSink>>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            namespace,
            inbox,
            sinks: Mutex::new(sinks),
            flush_interval,
            metrics: OutputMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &OutputMetrics {
        &self.metrics
    }

    pub async fn run(&self, cancel: CancellationToken) {
        debug!(namespace = %self.namespace.join("/"), sinks = self.sinks.lock().len(), "output worker started");

        let mut flush_tick = tokio::time::interval(self.flush_interval);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = flush_tick.tick() => self.flush(),
                message = self.inbox.pop(&cancel) => match message {
                    Some(message) => {
                        if let Err(e) = guarded_sync(|| self.write(&message)) {
                            error!(namespace = %self.namespace.join("/"), error = %e, "output iteration failed");
                        }
                    }
                    None => break,
                },
            }
        }

        // Messages still queued at cancellation are written before the final flush
        while let Some(message) = self.inbox.try_pop() {
            if let Err(e) = guarded_sync(|| self.write(&message)) {
                error!(namespace = %self.namespace.join("/"), error = %e, "output iteration failed");
            }
        }
        self.flush();

        debug!(namespace = %self.namespace.join("/"), "output worker stopped");
    }

    /// Write one message to every sink.
    ///
    /// Every sink is attempted; the first failure is returned.
    pub(crate) fn write(&self, message: &Payload) -> Result<()> {
        self.inbox.release_bytes(message.size() as u64);
        self.metrics.received_messages.inc();

        let mut first_err = None;
        for sink in self.sinks.lock().iter_mut() {
            match sink.write(message) {
                Ok(()) => self.metrics.successful_writes.inc(),
                Err(e) => {
                    self.metrics.failed_writes.inc();
                    first_err.get_or_insert(e);
                }
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    fn flush(&self) {
        let result = guarded_sync(|| {
            for sink in self.sinks.lock().iter_mut() {
                if let Err(e) = sink.flush() {
                    warn!(sink = sink.name(), error = %e, "failed to flush sink");
                }
            }
            Ok(())
        });
        if let Err(e) = result {
            error!(namespace = %self.namespace.join("/"), error = %e, "output flush failed");
        }
    }
}

impl MetricsProvider for OutputWorker {
    fn collect_metrics(&self, interval: Duration) -> Vec<Metric> {
        let ns = &self.namespace;
        vec![
            Metric::new(
                "received_messages",
                "Messages taken off the output queue",
                ns,
                MetricKind::Counter,
                self.metrics.received_messages.take(),
                "count",
                interval,
            ),
            Metric::new(
                "successful_writes",
                "Sink writes that succeeded",
                ns,
                MetricKind::Counter,
                self.metrics.successful_writes.take(),
                "count",
                interval,
            ),
            Metric::new(
                "failed_writes",
                "Sink writes that failed",
                ns,
                MetricKind::Counter,
                self.metrics.failed_writes.take(),
                "count",
                interval,
            ),
        ]
    }
}
