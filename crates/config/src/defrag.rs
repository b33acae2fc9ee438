//! Fragment reassembly timing

use std::time::Duration;

use serde::Deserialize;

/// `[defrag]` section
///
/// A bucket that has not seen a fragment for `packet_deadline` is assembled
/// with whatever arrived. The autoscaler moves the deadline by
/// `deadline_step` within `min_packet_deadline..=max_packet_deadline`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefragConfig {
    #[serde(with = "humantime_serde")]
    pub packet_deadline: Duration,
    #[serde(with = "humantime_serde")]
    pub min_packet_deadline: Duration,
    #[serde(with = "humantime_serde")]
    pub max_packet_deadline: Duration,
    #[serde(with = "humantime_serde")]
    pub deadline_step: Duration,
    /// How often each shard scans for expired buckets
    #[serde(with = "humantime_serde")]
    pub watcher_interval: Duration,
}

impl Default for DefragConfig {
    fn default() -> Self {
        Self {
            packet_deadline: Duration::from_millis(50),
            min_packet_deadline: Duration::from_millis(50),
            max_packet_deadline: Duration::from_secs(1),
            deadline_step: Duration::from_millis(10),
            watcher_interval: Duration::from_millis(200),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: DefragConfig = toml::from_str("").unwrap();
        assert_eq!(config.packet_deadline, Duration::from_millis(50));
        assert_eq!(config.max_packet_deadline, Duration::from_secs(1));
        assert_eq!(config.watcher_interval, Duration::from_millis(200));
    }

    #[test]
    fn test_humantime_values() {
        let toml = r#"
packet_deadline = "120ms"
max_packet_deadline = "2s"
deadline_step = "5ms"
"#;
        let config: DefragConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.packet_deadline, Duration::from_millis(120));
        assert_eq!(config.max_packet_deadline, Duration::from_secs(2));
        assert_eq!(config.deadline_step, Duration::from_millis(5));
    }

    #[test]
    fn test_bad_duration_rejected() {
        assert!(toml::from_str::<DefragConfig>("packet_deadline = \"soon\"").is_err());
    }
}
