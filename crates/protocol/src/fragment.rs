//! Splitting and rejoining messages

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::payload::Payload;
use crate::Result;

/// Text written in place of every fragment that never arrived
pub const MISSING_FRAGMENT: &str = "[missing fragment]";

/// Split `message` into fragments carrying at most `max_text_len` bytes of
/// text each.
///
/// Every fragment copies the message metadata and gets its position in
/// `message_seq`; all of them share `message_seq_max`. An empty text still
/// produces one fragment.
pub fn fragment(message: &Payload, max_text_len: usize) -> Result<Vec<Payload>> {
    if max_text_len == 0 {
        return Err(ProtocolError::invalid_field("max_text_len", "must be non-zero"));
    }

    let text = &message.log_text;
    let count = text.len().div_ceil(max_text_len).max(1);
    let seq_max = u16::try_from(count - 1).map_err(|_| {
        ProtocolError::invalid_field("log_text", format!("needs {count} fragments, more than fit a u16"))
    })?;

    let fragments = (0..count)
        .map(|i| {
            let start = i * max_text_len;
            let end = (start + max_text_len).min(text.len());
            Payload {
                message_seq: i as u16,
                message_seq_max: seq_max,
                log_text: text.slice(start..end),
                ..message.clone()
            }
        })
        .collect();
    Ok(fragments)
}

/// Join the fragments of one message.
///
/// Fragments may arrive in any order and some may be missing. Gaps before the
/// first, between, and after the last received fragment (up to
/// `message_seq_max`) are each filled with [`MISSING_FRAGMENT`]. The result
/// keeps the shared metadata with both sequence fields zeroed.
pub fn defragment(mut fragments: Vec<Payload>) -> Result<Payload> {
    let Some(first) = fragments.first() else {
        return Err(ProtocolError::NoFragments);
    };

    if let Some(odd) = fragments[1..].iter().find(|f| !f.shares_metadata(first)) {
        return Err(ProtocolError::SharedFieldsMismatch {
            host_id: odd.host_id,
            log_id: odd.log_id,
        });
    }

    fragments.sort_by_key(|f| f.message_seq);
    fragments.dedup_by_key(|f| f.message_seq);

    let seq_max = fragments[0].message_seq_max;
    let mut text = BytesMut::with_capacity(fragments.iter().map(|f| f.log_text.len()).sum());

    let mut expected: u32 = 0;
    for fragment in &fragments {
        let seq = u32::from(fragment.message_seq);
        for _ in expected..seq {
            text.put_slice(MISSING_FRAGMENT.as_bytes());
        }
        text.put_slice(&fragment.log_text);
        expected = seq + 1;
    }
    for _ in expected..=u32::from(seq_max) {
        text.put_slice(MISSING_FRAGMENT.as_bytes());
    }

    let mut whole = fragments.swap_remove(0);
    whole.message_seq = 0;
    whole.message_seq_max = 0;
    whole.log_text = text.freeze();
    Ok(whole)
}
