//! Queue errors

use thiserror::Error;

/// Errors from queue construction and resizing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Capacity is not a power of two of at least 2
    #[error("capacity {0} must be a power of two and at least 2")]
    InvalidCapacity(usize),

    /// Scaling bounds are inverted or not powers of two
    #[error("invalid capacity bounds: min {min}, max {max}")]
    InvalidBounds { min: usize, max: usize },
}

/// Push rejected because the ring had no free slot; hands the value back
#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue is full")]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Recover the rejected value
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;
