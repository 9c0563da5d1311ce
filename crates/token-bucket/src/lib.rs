//! Thread-safe token bucket rate limiter.
//!
//! A [`TokenBucket`] answers one question: may an operation of a given cost
//! run right now? It holds up to `capacity` tokens, gains `refill_amount`
//! tokens once per refill interval, and deducts the cost of every admitted
//! call. Rejection is a routine `false`, never an error; what to do with a
//! rejected call is up to the caller.
//!
//! ```
//! use std::time::Duration;
//! use token_bucket::{BucketOption, TokenBucket};
//!
//! let bucket = TokenBucket::with_options(
//!     5,
//!     2,
//!     [BucketOption::RefillInterval(Duration::from_secs(60))],
//! )
//! .unwrap();
//!
//! for _ in 0..5 {
//!     assert!(bucket.try_acquire_default());
//! }
//! assert!(!bucket.try_acquire(1));
//! ```
//!
//! The bucket is process-local. Share it between threads with an `Arc`.

mod bucket;
pub mod config;
pub mod error;
pub mod loader;

pub use bucket::TokenBucket;
pub use config::{BucketConfig, BucketOption, DEFAULT_COST, DEFAULT_REFILL_INTERVAL};
pub use error::{BucketError, BucketResult};
pub use loader::{BucketSettings, ConfigError, ConfigLoader};
