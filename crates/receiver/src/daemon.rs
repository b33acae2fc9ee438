//! Receiver daemon - builds the pipeline back to front and tears it down
//! front to back
//!
//! Startup order is output, defrag, processors, listeners so that every
//! stage has somewhere to send before the stage in front of it starts.
//! Shutdown reverses it, waiting for each queue to drain before stopping
//! the stage that reads it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sdsyslog_config::ReceiverConfig;
use sdsyslog_metrics::{Registry, wait_until_zero};
use sdsyslog_protocol::FragmentDecoder;
use sdsyslog_queue::Queue;

use crate::autoscaler::Autoscaler;
use crate::error::Result;
use crate::gatherer::Gatherer;
use crate::manager::{DefragManager, IngestManager, OutputManager, ProcessorManager};
use crate::worker::MessageSink;

/// Upper bound on every drain and join during shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

/// A running receiver
pub struct Daemon {
    cancel: CancellationToken,
    /// Stopped first so nothing is added while instances are removed
    scaling_cancel: CancellationToken,
    registry: Arc<Registry>,
    ingest: Arc<IngestManager>,
    processor: Arc<ProcessorManager>,
    defrag: Arc<DefragManager>,
    output: Arc<OutputManager>,
    gatherer_task: JoinHandle<()>,
    autoscaler_task: Option<JoinHandle<()>>,
}

impl Daemon {
    /// Start every stage at its configured minimum.
    ///
    /// Fails if a queue bound is invalid or a listener cannot bind; anything
    /// already started is cancelled first.
    pub async fn start(
        config: ReceiverConfig,
        decoder: Arc<dyn FragmentDecoder>,
        sinks: Vec<Box<dyn MessageSink>>,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();

        info!(address = %config.network.bind_addr(), "starting receiver");

        let Stages {
            ingest,
            processor,
            defrag,
            output,
        } = match Stages::start(&config, decoder, sinks, &cancel).await {
            Ok(stages) => stages,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };

        let gatherer = Gatherer::builder()
            .config(config.metrics.clone())
            .provider(ingest.clone())
            .provider(processor.clone())
            .provider(defrag.clone())
            .provider(output.clone())
            .build();
        let registry = Arc::clone(gatherer.registry());
        let gatherer_task = {
            let cancel = cancel.child_token();
            tokio::spawn(async move { gatherer.run(cancel).await })
        };

        let scaling_cancel = cancel.child_token();
        let autoscaler_task = if config.autoscaling.enabled {
            let autoscaler = Autoscaler::new(
                &config,
                Arc::clone(&registry),
                Arc::clone(&ingest),
                Arc::clone(&processor),
                Arc::clone(&defrag),
                Arc::clone(&output),
            );
            let cancel = scaling_cancel.clone();
            Some(tokio::spawn(async move { autoscaler.run(cancel).await }))
        } else {
            info!("autoscaling disabled");
            None
        };

        info!(
            address = %ingest.local_addr(),
            listeners = ingest.count(),
            processors = processor.count(),
            defrag_pairs = defrag.count(),
            "receiver started"
        );

        Ok(Self {
            cancel,
            scaling_cancel,
            registry,
            ingest,
            processor,
            defrag,
            output,
            gatherer_task,
            autoscaler_task,
        })
    }

    /// Address the listeners are bound to, with an ephemeral port resolved
    pub fn local_addr(&self) -> SocketAddr {
        self.ingest.local_addr()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn ingest(&self) -> &Arc<IngestManager> {
        &self.ingest
    }

    pub fn processor(&self) -> &Arc<ProcessorManager> {
        &self.processor
    }

    pub fn defrag(&self) -> &Arc<DefragManager> {
        &self.defrag
    }

    pub fn output(&self) -> &Arc<OutputManager> {
        &self.output
    }

    /// Drain and stop every stage, front to back.
    ///
    /// Each drain waits at most [`SHUTDOWN_TIMEOUT`]; whatever is still
    /// queued after that is dropped and logged.
    pub async fn shutdown(self) {
        info!("receiver shutdown started");

        self.scaling_cancel.cancel();
        if let Some(task) = self.autoscaler_task {
            join("autoscaler", task).await;
        }

        self.ingest.remove_all().await;

        let inbox = Arc::clone(self.processor.inbox());
        let (drained, left) = wait_until_zero(|| inbox.len() as u64, SHUTDOWN_TIMEOUT).await;
        if !drained {
            warn!(dropped = left, "processor queue did not empty in time");
        }
        self.processor.remove_all().await;

        self.defrag.remove_all().await;

        let outbox = Arc::clone(self.output.inbox());
        let (drained, left) = wait_until_zero(|| outbox.len() as u64, SHUTDOWN_TIMEOUT).await;
        if !drained {
            warn!(dropped = left, "output queue did not empty in time");
        }
        self.output.remove_all().await;

        self.cancel.cancel();
        join("metrics gatherer", self.gatherer_task).await;

        info!("receiver shutdown complete");
    }
}

async fn join(name: &str, task: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task = name, error = %e, "task panicked"),
        Err(_) => warn!(task = name, "task did not finish within timeout"),
    }
}

/// The four managers, started back to front
struct Stages {
    ingest: Arc<IngestManager>,
    processor: Arc<ProcessorManager>,
    defrag: Arc<DefragManager>,
    output: Arc<OutputManager>,
}

impl Stages {
    async fn start(
        config: &ReceiverConfig,
        decoder: Arc<dyn FragmentDecoder>,
        sinks: Vec<Box<dyn MessageSink>>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let scaling = &config.autoscaling;

        let output_queue = Queue::with_bounds(scaling.min_output_queue, scaling.min_output_queue, scaling.max_output_queue)?;
        let output = Arc::new(OutputManager::new(
            Arc::new(output_queue),
            config.output.flush_interval,
            cancel.child_token(),
        ));
        output.add_instance(sinks);

        let defrag = Arc::new(DefragManager::new(
            &config.defrag,
            Arc::clone(output.inbox()),
            scaling.shard_buffer,
            SHUTDOWN_TIMEOUT,
            scaling.min_assemblers,
            scaling.max_assemblers,
            cancel.child_token(),
        ));
        for _ in 0..scaling.min_assemblers {
            defrag.add_instance().await;
        }

        let processor_queue = Queue::with_bounds(
            scaling.min_processor_queue,
            scaling.min_processor_queue,
            scaling.max_processor_queue,
        )?;
        let processor = Arc::new(ProcessorManager::new(
            Arc::new(processor_queue),
            decoder,
            defrag.routing(),
            scaling.min_processors,
            scaling.max_processors,
            cancel.child_token(),
        ));
        for _ in 0..scaling.min_processors {
            processor.add_instance();
        }

        let ingest = Arc::new(IngestManager::new(
            &config.network,
            Arc::clone(processor.inbox()),
            scaling.min_listeners,
            scaling.max_listeners,
            cancel.child_token(),
        )?);
        for _ in 0..scaling.min_listeners {
            ingest.add_instance()?;
        }

        Ok(Self {
            ingest,
            processor,
            defrag,
            output,
        })
    }
}
