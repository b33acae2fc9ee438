//! Output manager - the output queue and its writer

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sdsyslog_metrics::{Metric, MetricsProvider};
use sdsyslog_protocol::Payload;
use sdsyslog_queue::Queue;

use super::{Instance, InstanceTable};
use crate::namespace;
use crate::worker::{MessageSink, OutputWorker};

/// Owns the output queue and the worker writing it to the sinks.
///
/// Normally runs a single worker; sinks are owned by the worker, so each
/// instance needs its own set.
pub struct OutputManager {
    inbox: Arc<Queue<Payload>>,
    flush_interval: Duration,
    cancel: CancellationToken,
    instances: Mutex<InstanceTable<OutputWorker>>,
}

impl OutputManager {
    pub fn new(inbox: Arc<Queue<Payload>>, flush_interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            inbox,
            flush_interval,
            cancel,
            instances: Mutex::new(InstanceTable::new()),
        }
    }

    pub fn inbox(&self) -> &Arc<Queue<Payload>> {
        &self.inbox
    }

    pub fn add_instance(&self, sinks: Vec<Box<dyn MessageSink>>) -> usize {
        let mut instances = self.instances.lock();
        let id = instances.next_id();
        let worker = Arc::new(OutputWorker::new(
            namespace::output_worker(),
            Arc::clone(&self.inbox),
            sinks,
            self.flush_interval,
        ));
        instances.insert(id, Instance::spawn(worker, &self.cancel, |w, cancel| async move { w.run(cancel).await }));

        info!(id, "started output worker");
        id
    }

    /// Stop a worker after it flushed its sinks. Returns whether it existed.
    pub async fn remove_instance(&self, id: usize) -> bool {
        let Some(instance) = self.instances.lock().remove(id) else {
            return false;
        };
        instance.stop().await;
        info!(id, "stopped output worker");
        true
    }

    pub async fn remove_all(&self) {
        let instances = self.instances.lock().drain();
        for instance in instances {
            instance.stop().await;
        }
    }

    pub fn instance_ids(&self) -> Vec<usize> {
        self.instances.lock().ids()
    }

    pub fn count(&self) -> usize {
        self.instances.lock().len()
    }
}

impl MetricsProvider for OutputManager {
    fn collect_metrics(&self, interval: Duration) -> Vec<Metric> {
        let mut metrics = self.inbox.collect_metrics(&namespace::output_queue(), interval);
        for worker in self.instances.lock().workers() {
            metrics.extend(worker.collect_metrics(interval));
        }
        metrics
    }
}
