//! SDSyslog Receiver Configuration
//!
//! TOML-based configuration loading with defaults for every field.
//! An empty file is a valid configuration.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use sdsyslog_config::ReceiverConfig;
//! use std::str::FromStr;
//!
//! let config = ReceiverConfig::from_str("[network]\nport = 5514").unwrap();
//! assert_eq!(config.network.port, 5514);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [network]
//! address = "::"
//! port = 8514
//!
//! [autoscaling]
//! poll_interval = "5s"
//! max_assemblers = 8
//!
//! [defrag]
//! packet_deadline = "50ms"
//!
//! [output]
//! file_path = "/var/log/sdsyslog/messages.log"
//!
//! [log]
//! level = "info"
//! ```

mod autoscaling;
mod defrag;
mod error;
mod logging;
mod metrics;
mod network;
mod output;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use autoscaling::{AutoscalingConfig, num_cpus};
pub use defrag::DefragConfig;
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use metrics::MetricsConfig;
pub use network::NetworkConfig;
pub use output::OutputConfig;

use serde::Deserialize;

/// Main receiver configuration
///
/// All sections are optional with defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// UDP listener settings
    pub network: NetworkConfig,

    /// Instance and queue bounds for the autoscaler
    pub autoscaling: AutoscalingConfig,

    /// Reassembly deadline and its adjustment range
    pub defrag: DefragConfig,

    /// Internal metrics collection
    pub metrics: MetricsConfig,

    /// Where assembled messages are written
    pub output: OutputConfig,

    /// Receiver diagnostics
    pub log: LogConfig,
}

impl ReceiverConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid TOML, or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    ///
    /// Prefer using the `FromStr` trait implementation.
    fn parse(s: &str) -> Result<Self> {
        let mut config: ReceiverConfig = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.autoscaling.clamp_minimums(num_cpus());
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

impl FromStr for ReceiverConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
