//! Robust statistics for trend detection

/// What a trend suggests doing with a scalable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scale {
    Up,
    Down,
    #[default]
    Hold,
}

/// Number of samples dropped from each end of a sorted set of `n`.
///
/// Never trims so much that nothing is left.
fn trim_count(n: usize, trim: f64) -> usize {
    let trim = trim.max(0.0);
    let count = (n as f64 * trim) as usize;
    if count * 2 >= n { (n - 1) / 2 } else { count }
}

/// Mean after dropping `trim` (fraction) of the lowest and highest values.
///
/// Returns 0 for an empty slice.
pub fn trimmed_mean_u64(values: &[u64], trim: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let k = trim_count(sorted.len(), trim);
    let kept = &sorted[k..sorted.len() - k];
    let sum: u128 = kept.iter().map(|v| *v as u128).sum();
    (sum / kept.len() as u128) as u64
}

/// Floating point variant of [`trimmed_mean_u64`]
pub fn trimmed_mean_f64(values: &[f64], trim: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);

    let k = trim_count(sorted.len(), trim);
    mean(&sorted[k..sorted.len() - k])
}

/// Arithmetic mean; 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Least-squares slope of `values` against their index.
///
/// `None` when fewer than two points make the fit degenerate.
pub fn regression_slope(values: &[f64]) -> Option<f64> {
    let n = values.len() as f64;
    let (mut sx, mut sy, mut sxy, mut sxx) = (0.0, 0.0, 0.0, 0.0);
    for (i, v) in values.iter().enumerate() {
        let x = i as f64;
        sx += x;
        sy += v;
        sxy += x * v;
        sxx += x * x;
    }

    let denom = n * sxx - sx * sx;
    if denom == 0.0 {
        return None;
    }
    Some((n * sxy - sx * sy) / denom)
}
