//! Internal metrics collection settings

use std::time::Duration;

use serde::Deserialize;

/// `[metrics]` section
///
/// ```toml
/// [metrics]
/// interval = "15s"
/// max_age = "1h"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Length of one collection round; also the registry time slice width
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Slices older than this are pruned
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_age: Duration::from_secs(3600),
        }
    }
}
