//! SDSyslog Receiver
//!
//! UDP ingest, fragment reassembly and output, with every stage run as an
//! autoscaled pool of tokio tasks.
//!
//! # Architecture
//!
//! ```text
//!              Queue<RawPacket>                Shard (buckets)           Queue<Payload>
//! [Listeners] ──────────────────► [Processors] ──route──► [Shard ─► Assembler] ──────────► [Output] ──► file / stdout
//!   SO_REUSEPORT     decode                         │          ready keys
//!                                                   └─ overrides while a shard drains
//!
//!   Gatherer ── every interval ──► Registry ◄── Autoscaler (adds/removes instances,
//!                                                resizes queues, moves the packet deadline)
//! ```
//!
//! # Key Design
//!
//! - **Independent stages**: Stages only share the [`Queue`] and [`Shard`]
//!   structures between them
//! - **Sticky routing**: Every fragment of a message lands in the same shard,
//!   including while that shard shuts down
//! - **Bounded teardown**: Removing an instance waits for its backlog to
//!   drain, but never longer than the shutdown timeout
//!
//! [`Queue`]: sdsyslog_queue::Queue
//! [`Shard`]: shard::Shard

mod autoscaler;
mod daemon;
mod error;
mod gatherer;
pub mod logging;
pub mod manager;
pub mod namespace;
pub mod routing;
pub mod shard;
pub mod worker;

use std::time::Duration;

pub use autoscaler::{Autoscaler, listener_trend};
pub use daemon::{Daemon, SHUTDOWN_TIMEOUT};
pub use error::{ReceiverError, Result};
pub use gatherer::Gatherer;

/// Nanoseconds in `d`, saturating at `u64::MAX`
pub(crate) fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
