//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A lower bound is above its upper bound
    #[error("[{section}] {min_field} ({min}) must not exceed {max_field} ({max})")]
    InvertedBounds {
        section: &'static str,
        min_field: &'static str,
        max_field: &'static str,
        min: String,
        max: String,
    },

    /// Validation error - invalid value
    #[error("[{section}] has invalid {field}: {message}")]
    InvalidValue {
        /// Config section, without brackets
        section: &'static str,
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },
}

impl ConfigError {
    /// Create an InvertedBounds error
    pub fn inverted_bounds(
        section: &'static str,
        min_field: &'static str,
        max_field: &'static str,
        min: impl ToString,
        max: impl ToString,
    ) -> Self {
        Self::InvertedBounds {
            section,
            min_field,
            max_field,
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Create an InvalidValue error
    pub fn invalid_value(
        section: &'static str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            section,
            field,
            message: message.into(),
        }
    }
}
