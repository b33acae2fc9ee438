//! Capacity scaling decisions

use sdsyslog_metrics::Scale;
use tracing::{info, warn};

use crate::queue::Queue;

/// Occupancy percent at or above which the queue doubles
const SCALE_UP_OCCUPANCY: f64 = 90.0;

/// Occupancy percent at or below which the queue halves
const SCALE_DOWN_OCCUPANCY: f64 = 2.0;

/// Latest occupancy percent a rising history must exceed
const TREND_HIGH_WATERMARK: f64 = 70.0;

/// Latest occupancy percent a falling history must be under
const TREND_LOW_WATERMARK: f64 = 15.0;

/// Adjacent moves in the same direction required to call a trend
const TREND_CONSISTENCY: usize = 3;

/// Smallest power of two `>= n` (1 for `n <= 1`)
pub fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Largest power of two strictly below `next_power_of_two(n)`; 0 for 0
pub fn prev_power_of_two(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    next_power_of_two(n) >> 1
}

impl<T> Queue<T> {
    /// Grow or shrink one step based on current occupancy.
    ///
    /// Uses the host's available memory to refuse growth that would not fit.
    /// Returns the new capacity when a migration was started.
    pub fn scale_capacity(&self) -> Option<usize> {
        self.scale_capacity_within(available_memory())
    }

    /// [`scale_capacity`](Queue::scale_capacity) against an explicit memory
    /// budget in bytes; 0 means unknown and disables the memory guard
    pub fn scale_capacity_within(&self, available_memory: u64) -> Option<usize> {
        let capacity = self.capacity();
        let depth = self.len();
        let occupancy = depth as f64 / capacity as f64 * 100.0;

        let target = if occupancy >= SCALE_UP_OCCUPANCY {
            if capacity >= self.max_capacity {
                return None;
            }
            let target = next_power_of_two(capacity + 1).min(self.max_capacity);

            let per_item = self.bytes() / depth.max(1) as u64;
            let projected = per_item.saturating_mul(target as u64);
            if available_memory > 0 && projected > available_memory {
                warn!(
                    capacity,
                    projected_bytes = projected,
                    available_memory,
                    "not growing queue, projected size exceeds available memory"
                );
                return None;
            }
            target
        } else if occupancy <= SCALE_DOWN_OCCUPANCY {
            if capacity <= self.min_capacity {
                return None;
            }
            prev_power_of_two(capacity).max(self.min_capacity)
        } else {
            return None;
        };

        match self.mutate_size(target) {
            Ok(true) => {
                info!(from = capacity, to = target, "scaled queue capacity");
                Some(target)
            }
            Ok(false) => None,
            Err(e) => {
                warn!(error = %e, "failed to scale queue capacity");
                None
            }
        }
    }
}

/// Direction suggested by a history of queue depths, oldest first.
///
/// Scales up when the newest depth is above 70% of `capacity` after three
/// consecutive rises, down when it is under 15% after three consecutive
/// falls. Needs at least three samples.
pub fn trend(depths: &[u64], capacity: usize) -> Scale {
    let n = depths.len();
    if n < 3 || capacity == 0 {
        return Scale::Hold;
    }

    let latest_pct = depths[n - 1] as f64 / capacity as f64 * 100.0;

    let mut direction = 0i8;
    let mut consistent = 1;
    for i in (0..n - 1).rev() {
        if consistent >= TREND_CONSISTENCY {
            break;
        }

        let step = match depths[i + 1].cmp(&depths[i]) {
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
        };

        if direction == 0 {
            direction = step;
            continue;
        }
        if step != direction {
            break;
        }
        consistent += 1;
    }

    if consistent < TREND_CONSISTENCY {
        return Scale::Hold;
    }
    if latest_pct > TREND_HIGH_WATERMARK && direction > 0 {
        Scale::Up
    } else if latest_pct < TREND_LOW_WATERMARK && direction < 0 {
        Scale::Down
    } else {
        Scale::Hold
    }
}

/// Bytes of memory the kernel reports as available; 0 if unknown
#[cfg(target_os = "linux")]
pub fn available_memory() -> u64 {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| {
            content
                .lines()
                .find(|line| line.starts_with("MemAvailable:"))
                .and_then(|line| {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<u64>().ok())
                        .map(|kb| kb * 1024)
                })
        })
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
pub fn available_memory() -> u64 {
    0
}

#[cfg(test)]
#[path = "scaling_test.rs"]
mod scaling_test;
