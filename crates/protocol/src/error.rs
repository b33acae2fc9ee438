//! Protocol error types
//!
//! Errors that can occur when decoding, validating or reassembling payloads.

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Defragment was handed nothing to join
    #[error("received no fragments to defragment")]
    NoFragments,

    /// Fragments of one message disagree on their metadata
    #[error("shared fields not identical across fragments (host {host_id}, log {log_id})")]
    SharedFieldsMismatch { host_id: u32, log_id: u32 },

    /// A decoded field failed validation
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Fragment bytes could not be parsed
    #[error("malformed fragment: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Create an invalid field error
    #[inline]
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
