//! Waiting on atomic counters

use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Consecutive zero readings required before a counter counts as drained
const ZERO_STREAK: usize = 3;

/// Poll attempts before giving up regardless of the timeout
const MAX_ITERATIONS: usize = 30;

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Wait until `read` returns zero three times in a row.
///
/// `read` samples an atomic gauge such as [`Counter::get`](crate::Counter::get)
/// or a queue depth. Polls with exponential backoff (50ms doubling to 1s),
/// never sleeping past `timeout`. Returns whether zero was reached and the
/// last value read, which on timeout is the number of items left behind.
pub async fn wait_until_zero<F>(read: F, timeout: Duration) -> (bool, u64)
where
    F: Fn() -> u64,
{
    let deadline = Instant::now() + timeout;
    let mut backoff = INITIAL_BACKOFF;
    let mut streak = 0;
    let mut last = 0;

    for _ in 0..MAX_ITERATIONS {
        last = read();
        if last == 0 {
            streak += 1;
            if streak >= ZERO_STREAK {
                return (true, 0);
            }
        } else {
            streak = 0;
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }

        sleep(backoff.min(deadline - now)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }

    (false, last)
}
