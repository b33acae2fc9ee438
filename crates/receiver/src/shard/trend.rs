//! Shard scaling heuristics

use sdsyslog_metrics::{Scale, mean};

/// Largest bucket-count change a single interval contributes
const MAX_DELTA: f64 = 10.0;
const UP_THRESHOLD: f64 = 5.0;
const DOWN_THRESHOLD: f64 = 2.0;

/// Average timeout ratio above which the deadline is lengthened
const RATIO_UP: f64 = 0.05;
/// Average timeout ratio below which the deadline may shorten
const RATIO_DOWN: f64 = 0.01;

/// Whether to add or remove a defrag pair, from per-interval bucket counts
/// (`total_buckets`), oldest first.
///
/// Interval deltas are clamped to ±10 so one burst cannot trigger scaling,
/// then averaged with linear weights favouring recent intervals.
pub fn trend(bucket_counts: &[u64]) -> Scale {
    if bucket_counts.len() < 2 {
        return Scale::Hold;
    }

    let (weighted, weights) = bucket_counts
        .windows(2)
        .map(|w| (w[1] as f64 - w[0] as f64).clamp(-MAX_DELTA, MAX_DELTA))
        .enumerate()
        .fold((0.0, 0.0), |(sum, weights), (i, delta)| {
            let weight = (i + 1) as f64;
            (sum + delta * weight, weights + weight)
        });
    let trend = weighted / weights;

    if trend > UP_THRESHOLD {
        Scale::Up
    } else if trend < -DOWN_THRESHOLD {
        Scale::Down
    } else {
        Scale::Hold
    }
}

/// Whether to lengthen (`Up`) or shorten (`Down`) the packet deadline.
///
/// Takes per-interval fragment spacing sums, fragment counts and timed-out
/// bucket counts, oldest first. A high timeout ratio or growing spacing
/// lengthens; a low ratio with shrinking spacing shortens. When both hold,
/// lengthening wins.
pub fn trend_latency(sum_spacing: &[u64], fragments: &[u64], timeouts: &[u64]) -> Scale {
    let n = fragments.len();
    if n == 0 {
        return Scale::Hold;
    }

    let (ratios, spacings): (Vec<f64>, Vec<f64>) = (0..n)
        .map(|i| match fragments[i] {
            0 => (0.0, 0.0),
            count => {
                let count = count as f64;
                let timed_out = timeouts.get(i).copied().unwrap_or(0) as f64;
                let spacing = sum_spacing.get(i).copied().unwrap_or(0) as f64;
                (timed_out / count, spacing / count)
            }
        })
        .unzip();

    let avg_ratio = mean(&ratios);
    let slope = (spacings[n - 1] - spacings[0]) / n as f64;

    if avg_ratio > RATIO_UP || slope > 0.0 {
        Scale::Up
    } else if avg_ratio < RATIO_DOWN && slope < 0.0 {
        Scale::Down
    } else {
        Scale::Hold
    }
}

#[cfg(test)]
#[path = "trend_test.rs"]
mod tests;
