//! Ingest manager - the pool of UDP listeners

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sdsyslog_config::NetworkConfig;
use sdsyslog_metrics::{Metric, MetricsProvider};
use sdsyslog_queue::Queue;

use super::{Instance, InstanceTable};
use crate::error::{ReceiverError, Result};
use crate::namespace;
use crate::worker::{Listener, RawPacket, bind_udp};

/// Starts and stops listeners sharing one address
pub struct IngestManager {
    /// Port 0 is replaced by the port of the first bound socket
    addr: Mutex<SocketAddr>,
    buffer_size: usize,
    min_packet_len: usize,
    outbox: Arc<Queue<RawPacket>>,
    min: usize,
    max: usize,
    cancel: CancellationToken,
    instances: Mutex<InstanceTable<Listener>>,
}

impl IngestManager {
    pub fn new(
        config: &NetworkConfig,
        outbox: Arc<Queue<RawPacket>>,
        min: usize,
        max: usize,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let bind_addr = config.bind_addr();
        let addr: SocketAddr = bind_addr
            .parse()
            .map_err(|_| ReceiverError::InvalidAddress(bind_addr.clone()))?;

        Ok(Self {
            addr: Mutex::new(addr),
            buffer_size: config.buffer_size,
            min_packet_len: config.min_packet_len,
            outbox,
            min,
            max,
            cancel,
            instances: Mutex::new(InstanceTable::new()),
        })
    }

    /// Address the listeners are bound to
    pub fn local_addr(&self) -> SocketAddr {
        *self.addr.lock()
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Bind a new socket and start a listener on it
    pub fn add_instance(&self) -> Result<usize> {
        let mut addr = self.addr.lock();
        let socket = bind_udp(*addr, self.buffer_size)?;
        if addr.port() == 0 {
            *addr = socket.local_addr().map_err(|source| ReceiverError::Bind {
                address: addr.to_string(),
                source,
            })?;
        }

        let mut instances = self.instances.lock();
        let id = instances.next_id();
        let listener = Arc::new(Listener::new(
            &namespace::ingest_instance(id),
            socket,
            Arc::clone(&self.outbox),
            self.buffer_size,
            self.min_packet_len,
        ));
        let instance = Instance::spawn(listener, &self.cancel, |l, cancel| async move { l.run(cancel).await });
        instances.insert(id, instance);

        info!(id, addr = %*addr, "started listener");
        Ok(id)
    }

    /// Stop a listener and close its socket. Returns whether it existed.
    pub async fn remove_instance(&self, id: usize) -> bool {
        let Some(instance) = self.instances.lock().remove(id) else {
            return false;
        };
        instance.stop().await;
        info!(id, "stopped listener");
        true
    }

    /// Stop every listener
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

impl MetricsProvider for IngestManager {
    fn collect_metrics(&self, interval: Duration) -> Vec<Metric> {
        let listeners = self.instances.lock().workers();
        listeners.iter().flat_map(|l| l.collect_metrics(interval)).collect()
    }
}
