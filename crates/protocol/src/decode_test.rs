//! Tests for fragment decoding

use bytes::Bytes;
use chrono::DateTime;

use crate::decode::{FragmentDecoder, JsonCodec};
use crate::error::ProtocolError;
use crate::payload::Payload;

fn fragment() -> Payload {
    Payload {
        host_id: 1,
        log_id: 2,
        message_seq: 1,
        message_seq_max: 2,
        timestamp: DateTime::from_timestamp(1_700_000_000, 5).unwrap(),
        hostname: "web01".into(),
        application_name: "nginx".into(),
        process_id: 80,
        facility: "daemon".into(),
        severity: "err".into(),
        log_text: Bytes::from_static(b"upstream timed out"),
        ..Default::default()
    }
}

#[test]
fn test_json_decode_encoded_fragment() {
    let codec = JsonCodec;
    let data = codec.encode(&fragment()).unwrap();

    let decoded = codec.decode(&data).unwrap();

    assert_eq!(decoded, fragment());
    assert!(decoded.remote_ip.is_empty());
}

#[test]
fn test_json_decode_defaults_optional_fields() {
    let data = br#"{"host_id":1,"log_id":2,"timestamp":"2024-05-01T00:00:00Z","hostname":"h","log_text":"x"}"#;

    let decoded = JsonCodec.decode(data).unwrap();

    assert_eq!(decoded.message_seq_max, 0);
    assert_eq!(decoded.application_name, "");
}

#[test]
fn test_json_decode_malformed() {
    assert!(matches!(JsonCodec.decode(b"not json"), Err(ProtocolError::Malformed(_))));
}

#[test]
fn test_json_decode_validates() {
    let mut bad = fragment();
    bad.host_id = 0;
    let data = JsonCodec.encode(&bad).unwrap();

    assert!(matches!(
        JsonCodec.decode(&data),
        Err(ProtocolError::InvalidField { field: "host_id", .. })
    ));
}
