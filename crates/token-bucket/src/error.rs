//! Construction errors.

use std::time::Duration;
use thiserror::Error;

/// Rejected bucket parameters.
///
/// Only construction can fail. Once a bucket exists, every decision is a
/// plain `bool`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BucketError {
    /// A bucket that can never hold a token.
    #[error("capacity must be greater than 0")]
    ZeroCapacity,

    /// A bucket that would never refill.
    #[error("refill amount must be greater than 0")]
    ZeroRefillAmount,

    /// The interval cannot be added to a wall-clock timestamp.
    #[error("refill interval out of range: {interval:?}")]
    IntervalOutOfRange { interval: Duration },
}

/// Result type alias for bucket construction.
pub type BucketResult<T> = std::result::Result<T, BucketError>;
