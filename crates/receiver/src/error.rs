//! Receiver error types

use std::io;

use thiserror::Error;

use sdsyslog_protocol::ProtocolError;
use sdsyslog_queue::QueueError;

/// Receiver errors
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// Failed to build or bind a listener socket
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Socket read failed
    #[error("socket receive failed: {0}")]
    Receive(#[source] io::Error),

    /// Queue could not be constructed or resized
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Remote address could not be parsed for routing
    #[error("invalid remote address: {0}")]
    InvalidAddress(String),

    /// Routing found no defrag shards
    #[error("no shards available")]
    NoShards,

    /// The routed-to shard vanished between lookup and push
    #[error("shard {0} is no longer available")]
    ShardUnavailable(usize),

    /// Decoding or reassembly failed
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Output queue stayed full for every retry
    #[error("output queue full, dropped message (host {host_id}, log {log_id})")]
    OutputFull { host_id: u32, log_id: u32 },

    /// A worker iteration panicked; the worker carries on with the next one
    #[error("iteration panicked: {message}\n{trace}")]
    Panicked { message: String, trace: String },

    /// A message sink failed to write or flush
    #[error("sink {sink} failed: {source}")]
    Sink {
        sink: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Result type for receiver operations
pub type Result<T> = std::result::Result<T, ReceiverError>;
