//! Fragment routing across defrag shards
//!
//! Every fragment of a message stream must land in the same shard. The
//! default shard is a hash of the sender address and the message ids. While
//! a shard is shutting down, new streams that hash to it are pinned to
//! another shard with an override, and streams already in progress keep
//! going to the shard that holds their bucket.
//!
//! # Decision Order
//!
//! 1. A bucket for this key exists on the default shard: use it
//! 2. An override exists for this key: follow it
//! 3. The default shard is shutting down: pick an alternative and record an
//!    override
//! 4. Otherwise: the default shard

use std::net::IpAddr;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use sdsyslog_protocol::Payload;

use crate::error::{ReceiverError, Result};
use crate::shard::Shard;

/// Read access to the current shard set, plus the override table
pub trait RoutingView: Send + Sync {
    fn shard_count(&self) -> usize;

    fn shard(&self, index: usize) -> Option<Arc<Shard>>;

    fn is_shard_shutdown(&self, index: usize) -> bool;

    fn bucket_exists(&self, index: usize, bucket_key: &str) -> bool;

    fn override_for(&self, bucket_key: &str) -> Option<usize>;

    fn set_override(&self, bucket_key: &str, index: usize);

    /// First shard other than `orig` that is not shutting down, or `orig`
    /// when there is none
    fn find_alternative_shard(&self, orig: usize) -> usize;
}

/// Removes overrides once their bucket has been reassembled
pub trait OverrideCleaner: Send + Sync {
    fn clear_override(&self, bucket_key: &str);
}

/// Split an address into two integers for hashing.
///
/// IPv4 yields `(addr, 0)`; IPv6 yields the high and low 64 bits.
pub fn ip_to_integers(address: &str) -> Result<(u64, u64)> {
    let ip: IpAddr = address
        .parse()
        .map_err(|_| ReceiverError::InvalidAddress(address.to_string()))?;

    Ok(match ip {
        IpAddr::V4(v4) => (u64::from(u32::from(v4)), 0),
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            ((bits >> 64) as u64, bits as u64)
        }
    })
}

/// Key identifying one message stream
pub fn bucket_key(remote_ip: &str, fragment: &Payload) -> String {
    format!("{}-{}-{}", remote_ip, fragment.host_id, fragment.log_id)
}

/// Shard a stream hashes to when nothing overrides it
pub fn default_shard(ip: (u64, u64), fragment: &Payload, shard_count: usize) -> usize {
    let sum = ip
        .0
        .wrapping_add(ip.1)
        .wrapping_add(u64::from(fragment.host_id))
        .wrapping_add(u64::from(fragment.log_id));
    (sum % shard_count as u64) as usize
}

/// Route one fragment into its shard. Returns the shard index used.
///
/// `started` is when processing of the fragment began; shards use it for
/// deadline checks and fragment spacing.
pub async fn route_fragment(
    cancel: &CancellationToken,
    view: &dyn RoutingView,
    remote_ip: &str,
    fragment: Payload,
    started: Instant,
) -> Result<usize> {
    let ip = ip_to_integers(remote_ip)?;

    let shard_count = view.shard_count();
    if shard_count == 0 {
        return Err(ReceiverError::NoShards);
    }

    let default_index = default_shard(ip, &fragment, shard_count);
    let key = bucket_key(remote_ip, &fragment);

    let index = if view.bucket_exists(default_index, &key) {
        default_index
    } else if let Some(pinned) = view.override_for(&key) {
        pinned
    } else if view.is_shard_shutdown(default_index) {
        let alternative = view.find_alternative_shard(default_index);
        view.set_override(&key, alternative);
        alternative
    } else {
        default_index
    };

    let shard = view.shard(index).ok_or(ReceiverError::ShardUnavailable(index))?;
    let log_id = fragment.log_id;
    shard.push(cancel, &key, fragment, started).await;

    trace!(log_id, shard = index, "routed fragment");
    Ok(index)
}

#[cfg(test)]
#[path = "routing_test.rs"]
mod tests;
