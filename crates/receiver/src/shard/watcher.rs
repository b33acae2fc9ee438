//! Packet deadline watcher
//!
//! The last-resort completion path: buckets that stop receiving fragments
//! are closed once they sit idle past the current packet deadline, so a lost
//! fragment never strands the rest of its message.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Shard;

impl Shard {
    /// Scan for expired buckets every `tick` until cancelled.
    ///
    /// The deadline is re-read on every scan, so autoscaler adjustments take
    /// effect on the next tick.
    pub async fn run_timeout_watcher(&self, cancel: CancellationToken, tick: Duration) {
        let namespace = self.namespace().join("/");
        debug!(namespace = %namespace, "timeout watcher started");

        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for key in self.expire_stale() {
                warn!(namespace = %namespace, bucket = %key, "bucket timed out");
                self.enqueue(&cancel, key).await;
            }
        }

        debug!(namespace = %namespace, "timeout watcher stopped");
    }
}
