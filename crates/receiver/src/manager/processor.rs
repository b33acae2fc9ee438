//! Processor manager - the decode and route pool

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sdsyslog_metrics::{Metric, MetricsProvider};
use sdsyslog_protocol::FragmentDecoder;
use sdsyslog_queue::Queue;

use super::{Instance, InstanceTable};
use crate::namespace;
use crate::routing::RoutingView;
use crate::worker::{Processor, RawPacket};

/// Owns the processor inbox and the processors draining it
pub struct ProcessorManager {
    inbox: Arc<Queue<RawPacket>>,
    decoder: Arc<dyn FragmentDecoder>,
    routing: Arc<dyn RoutingView>,
    min: usize,
    max: usize,
    cancel: CancellationToken,
    instances: Mutex<InstanceTable<Processor>>,
}

impl ProcessorManager {
    pub fn new(
        inbox: Arc<Queue<RawPacket>>,
        decoder: Arc<dyn FragmentDecoder>,
        routing: Arc<dyn RoutingView>,
        min: usize,
        max: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inbox,
            decoder,
            routing,
            min,
            max,
            cancel,
            instances: Mutex::new(InstanceTable::new()),
        }
    }

    pub fn inbox(&self) -> &Arc<Queue<RawPacket>> {
        &self.inbox
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn add_instance(&self) -> usize {
        let mut instances = self.instances.lock();
        let id = instances.next_id();
        let processor = Arc::new(Processor::new(
            &namespace::processor_instance(id),
            Arc::clone(&self.inbox),
            Arc::clone(&self.decoder),
            Arc::clone(&self.routing),
        ));
        instances.insert(id, Instance::spawn(processor, &self.cancel, |p, cancel| async move { p.run(cancel).await }));

        info!(id, "started processor");
        id
    }

    /// Stop a processor. Returns whether it existed.
    pub async fn remove_instance(&self, id: usize) -> bool {
        let Some(instance) = self.instances.lock().remove(id) else {
            return false;
        };
        instance.stop().await;
        info!(id, "stopped processor");
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

impl MetricsProvider for ProcessorManager {
    /// Inbox queue metrics followed by every processor's
    fn collect_metrics(&self, interval: Duration) -> Vec<Metric> {
        let mut metrics = self.inbox.collect_metrics(&namespace::processor_queue(), interval);
        for processor in self.instances.lock().workers() {
            metrics.extend(processor.collect_metrics(interval));
        }
        metrics
    }
}
