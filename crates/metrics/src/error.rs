//! Metrics error types

use thiserror::Error;

/// Result type for registry queries
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Errors returned by registry queries
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Aggregation found nothing to aggregate
    #[error("search returned no results for '{name}'")]
    NoResults {
        /// Metric name searched for
        name: String,
    },

    /// Aggregation kind string not recognised
    #[error("unsupported aggregation type: {0}")]
    UnsupportedAggregation(String),
}
