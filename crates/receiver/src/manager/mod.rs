//! Instance managers
//!
//! One manager per pipeline stage. A manager starts and stops instances of
//! its worker, each on its own task under a child of the manager's
//! cancellation token, and keeps them in a table keyed by a monotonically
//! increasing id. Ids are never reused, so metric namespaces of removed
//! instances never collide with new ones.

mod defrag;
mod ingest;
mod output;
mod processor;

pub use defrag::{DefragManager, InstancePair, RoutingState};
pub use ingest::IngestManager;
pub use output::OutputManager;
pub use processor::ProcessorManager;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A running worker with the handles needed to stop it
pub(crate) struct Instance<W> {
    pub worker: Arc<W>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<W> Instance<W> {
    /// Spawn `run` under a child of `parent`
    pub fn spawn<F, Fut>(worker: Arc<W>, parent: &CancellationToken, run: F) -> Self
    where
        F: FnOnce(Arc<W>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let task = tokio::spawn(run(Arc::clone(&worker), cancel.clone()));
        Self { worker, cancel, task }
    }

    /// Cancel and wait for the task to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "instance task ended abnormally");
        }
    }
}

/// Instances of one worker type keyed by id
pub(crate) struct InstanceTable<W> {
    next_id: usize,
    instances: BTreeMap<usize, Instance<W>>,
}

impl<W> InstanceTable<W> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            instances: BTreeMap::new(),
        }
    }

    /// Reserve the next id
    pub fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, id: usize, instance: Instance<W>) {
        self.instances.insert(id, instance);
    }

    pub fn remove(&mut self, id: usize) -> Option<Instance<W>> {
        self.instances.remove(&id)
    }

    pub fn ids(&self) -> Vec<usize> {
        self.instances.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn workers(&self) -> Vec<Arc<W>> {
        self.instances.values().map(|i| Arc::clone(&i.worker)).collect()
    }

    /// Take every instance out of the table
    pub fn drain(&mut self) -> Vec<Instance<W>> {
        std::mem::take(&mut self.instances).into_values().collect()
    }
}
