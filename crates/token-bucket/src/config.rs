//! Bucket configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time between two refill ticks.
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of tokens charged by [`TokenBucket::try_acquire_default`].
///
/// [`TokenBucket::try_acquire_default`]: crate::TokenBucket::try_acquire_default
pub const DEFAULT_COST: u64 = 1;

/// Optional bucket settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Time between two refill ticks.
    #[serde(rename = "refill_interval_ms", with = "duration_ms")]
    pub refill_interval: Duration,
    /// Cost charged when the caller does not name one.
    pub default_cost: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            refill_interval: DEFAULT_REFILL_INTERVAL,
            default_cost: DEFAULT_COST,
        }
    }
}

impl BucketConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the refill interval.
    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }

    /// Set the default cost.
    pub fn with_default_cost(mut self, cost: u64) -> Self {
        self.default_cost = cost;
        self
    }

    /// Apply options in order. A later option overrides an earlier one
    /// touching the same field.
    pub fn apply<I>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = BucketOption>,
    {
        for option in options {
            match option {
                BucketOption::RefillInterval(interval) => self.refill_interval = interval,
                BucketOption::DefaultCost(cost) => self.default_cost = cost,
            }
        }
        self
    }
}

/// A single configuration override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketOption {
    /// Override the refill interval.
    RefillInterval(Duration),
    /// Override the default cost.
    DefaultCost(u64),
}

/// Durations as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
