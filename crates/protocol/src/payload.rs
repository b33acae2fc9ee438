//! Syslog payload
//!
//! One `Payload` is either a single fragment as decoded off the wire or, after
//! [`defragment`](crate::defragment), a whole message. Fragments of the same
//! message share every field except `message_seq` and `log_text`.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::ProtocolError;
use crate::Result;

/// Longest hostname a sender may claim
pub const MAX_HOSTNAME_LEN: usize = 255;

/// A syslog message or one fragment of it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    /// Sender address, stamped by the receiver rather than sent on the wire
    pub remote_ip: String,
    pub host_id: u32,
    pub log_id: u32,
    /// Position of this fragment; 0 on whole messages
    pub message_seq: u16,
    /// Last fragment position of the message; 0 on whole messages
    pub message_seq_max: u16,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub application_name: String,
    pub process_id: u32,
    pub facility: String,
    pub severity: String,
    pub log_text: Bytes,
}

impl Payload {
    /// Estimated in-memory footprint in bytes.
    ///
    /// Struct size plus the heap bytes behind every string and the text.
    /// Feeds the byte-sum metrics of queues and shards.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.remote_ip.len()
            + self.hostname.len()
            + self.application_name.len()
            + self.facility.len()
            + self.severity.len()
            + self.log_text.len()
    }

    /// Whether `other` carries the same per-message metadata
    pub fn shares_metadata(&self, other: &Payload) -> bool {
        self.remote_ip == other.remote_ip
            && self.host_id == other.host_id
            && self.log_id == other.log_id
            && self.message_seq_max == other.message_seq_max
            && self.timestamp == other.timestamp
            && self.hostname == other.hostname
            && self.application_name == other.application_name
            && self.process_id == other.process_id
            && self.facility == other.facility
            && self.severity == other.severity
    }

    /// Check a freshly decoded fragment before it enters the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.host_id == 0 {
            return Err(ProtocolError::invalid_field("host_id", "must be non-zero"));
        }
        if self.log_id == 0 {
            return Err(ProtocolError::invalid_field("log_id", "must be non-zero"));
        }
        if self.message_seq > self.message_seq_max {
            return Err(ProtocolError::invalid_field(
                "message_seq",
                format!("{} exceeds maximum {}", self.message_seq, self.message_seq_max),
            ));
        }
        if self.hostname.is_empty() {
            return Err(ProtocolError::invalid_field("hostname", "empty"));
        }
        if self.hostname.len() > MAX_HOSTNAME_LEN {
            return Err(ProtocolError::invalid_field(
                "hostname",
                format!("longer than {MAX_HOSTNAME_LEN} bytes"),
            ));
        }
        if !is_printable_ascii(self.hostname.as_bytes()) {
            return Err(ProtocolError::invalid_field("hostname", "non-printable or non-ASCII"));
        }
        if std::str::from_utf8(&self.log_text).is_err() {
            return Err(ProtocolError::invalid_field("log_text", "not valid UTF-8"));
        }
        Ok(())
    }

    /// Render as one output line, without a trailing newline.
    ///
    /// `2020-01-01T10:10:10.123456789Z host app[1234]: daemon: [INFO]: text`
    pub fn format_text(&self) -> String {
        format!(
            "{} {} {}[{}]: {}: [{}]: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.hostname,
            self.application_name,
            self.process_id,
            self.facility,
            self.severity.to_uppercase(),
            String::from_utf8_lossy(&self.log_text),
        )
    }
}

fn is_printable_ascii(data: &[u8]) -> bool {
    data.iter().all(|b| (0x20..=0x7E).contains(b))
}
