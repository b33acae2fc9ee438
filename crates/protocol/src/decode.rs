//! Fragment decoding
//!
//! The receiver turns raw datagrams into [`Payload`]s through the
//! [`FragmentDecoder`] trait, so the wire format (and any decryption in front
//! of it) stays pluggable. [`JsonCodec`] is a plain-text format for local
//! senders and tests.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payload::Payload;
use crate::Result;

/// Turns one datagram into one validated fragment
pub trait FragmentDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Payload>;
}

/// JSON rendering of a fragment; `remote_ip` is never on the wire
#[derive(Debug, Serialize, Deserialize)]
struct JsonFragment {
    host_id: u32,
    log_id: u32,
    #[serde(default)]
    message_seq: u16,
    #[serde(default)]
    message_seq_max: u16,
    timestamp: DateTime<Utc>,
    hostname: String,
    #[serde(default)]
    application_name: String,
    #[serde(default)]
    process_id: u32,
    #[serde(default)]
    facility: String,
    #[serde(default)]
    severity: String,
    log_text: String,
}

/// One JSON object per datagram
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Serialize a fragment the way [`JsonCodec::decode`] expects it
    pub fn encode(&self, fragment: &Payload) -> Result<Vec<u8>> {
        let json = JsonFragment {
            host_id: fragment.host_id,
            log_id: fragment.log_id,
            message_seq: fragment.message_seq,
            message_seq_max: fragment.message_seq_max,
            timestamp: fragment.timestamp,
            hostname: fragment.hostname.clone(),
            application_name: fragment.application_name.clone(),
            process_id: fragment.process_id,
            facility: fragment.facility.clone(),
            severity: fragment.severity.clone(),
            log_text: String::from_utf8_lossy(&fragment.log_text).into_owned(),
        };
        Ok(serde_json::to_vec(&json)?)
    }
}

impl FragmentDecoder for JsonCodec {
    fn decode(&self, data: &[u8]) -> Result<Payload> {
        let json: JsonFragment = serde_json::from_slice(data)?;
        let payload = Payload {
            remote_ip: String::new(),
            host_id: json.host_id,
            log_id: json.log_id,
            message_seq: json.message_seq,
            message_seq_max: json.message_seq_max,
            timestamp: json.timestamp,
            hostname: json.hostname,
            application_name: json.application_name,
            process_id: json.process_id,
            facility: json.facility,
            severity: json.severity,
            log_text: Bytes::from(json.log_text),
        };
        payload.validate()?;
        Ok(payload)
    }
}
