//! Message output destinations

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// `[output]` section
///
/// ```toml
/// [output]
/// file_path = "/var/log/sdsyslog/messages.log"
/// stdout = false
/// flush_interval = "500ms"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Append assembled messages to this file
    pub file_path: Option<PathBuf>,

    /// Also print assembled messages to stdout
    pub stdout: bool,

    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            stdout: false,
            flush_interval: Duration::from_millis(500),
        }
    }
}
