//! Pipeline workers
//!
//! One worker type per stage. Each runs as its own tokio task and loops
//! until its cancellation token fires:
//!
//! ```text
//! loop {
//!     select! {
//!         cancelled => break,
//!         step()    => log the error if any, keep going,
//!     }
//! }
//! ```
//!
//! A failed iteration never ends the worker; only cancellation does.

mod assembler;
mod listener;
mod output;
mod processor;
mod sink;

pub use assembler::{Assembler, AssemblerMetrics};
pub use listener::{Listener, ListenerMetrics, RawPacket, bind_udp};
pub use output::{OutputMetrics, OutputWorker};
pub use processor::{Processor, ProcessorMetrics};
pub use sink::{FileSink, MessageSink, StdoutSink};

use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};

use futures_util::FutureExt;
use tokio::time::Instant;

use sdsyslog_metrics::Counter;

use crate::error::{ReceiverError, Result};
use crate::nanos;

/// Run one loop iteration, turning a panic into [`ReceiverError::Panicked`]
pub(crate) async fn guarded<F>(iteration: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    AssertUnwindSafe(iteration)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panicked(payload)))
}

/// [`guarded`] for iterations that never await
pub(crate) fn guarded_sync<F>(iteration: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    catch_unwind(AssertUnwindSafe(iteration)).unwrap_or_else(|payload| Err(panicked(payload)))
}

fn panicked(payload: Box<dyn Any + Send>) -> ReceiverError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    ReceiverError::Panicked {
        message,
        trace: Backtrace::force_capture().to_string(),
    }
}

/// Per-item processing time, summed and maximised over an interval
#[derive(Debug, Default)]
pub struct ElapsedStats {
    pub sum_ns: Counter,
    pub max_ns: Counter,
}

impl ElapsedStats {
    /// Record the time since `start`
    pub fn record(&self, start: Instant) {
        let elapsed = nanos(start.elapsed());
        self.sum_ns.add(elapsed);
        self.max_ns.record_max(elapsed);
    }

    /// Average over `count` items and the maximum, both reset
    pub fn take(&self, count: u64) -> (u64, u64) {
        let sum = self.sum_ns.take();
        let max = self.max_ns.take();
        let avg = if count > 0 { sum / count } else { 0 };
        (avg, max)
    }
}
