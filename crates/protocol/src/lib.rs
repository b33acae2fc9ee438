//! SDSyslog Protocol - Payload types shared by every receiver stage
//!
//! This crate provides:
//! - `Payload` - A syslog message, or one fragment of it
//! - `fragment` / `defragment` - Splitting a message and joining it back,
//!   with placeholders for fragments that never arrived
//! - `FragmentDecoder` - The seam between raw datagrams and payloads
//! - `JsonCodec` - A JSON datagram format implementing that seam
//!
//! # Design Principles
//!
//! - **Zero-copy text**: `log_text` is `bytes::Bytes`, so fragmenting slices
//!   the original buffer instead of copying it
//! - **Validated on entry**: decoders reject malformed fragments before they
//!   reach routing

mod decode;
mod error;
mod fragment;
mod payload;

pub use decode::{FragmentDecoder, JsonCodec};
pub use error::ProtocolError;
pub use fragment::{MISSING_FRAGMENT, defragment, fragment};
pub use payload::{MAX_HOSTNAME_LEN, Payload};

// Re-export bytes for convenience
pub use bytes::Bytes;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Test modules - only compiled during testing
#[cfg(test)]
mod decode_test;
