//! Token bucket rate limiting algorithm.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::{BucketConfig, BucketOption};
use crate::error::{BucketError, BucketResult};

/// Token bucket for rate limiting.
///
/// The bucket starts full. Every decision first runs at most one refill
/// step and then either deducts the requested cost or leaves the level
/// untouched. Both happen under one lock, so concurrent callers can never
/// spend the same token twice.
///
/// A refill is due once the wall clock reaches `next_refill_at`, compared
/// at whole-second resolution. An idle bucket gets a single refill of
/// `refill_amount` on its next check, however many intervals went by.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum tokens (burst size).
    capacity: u64,
    /// Tokens added per refill tick.
    refill_amount: u64,
    /// Effective configuration.
    config: BucketConfig,
    /// `config.refill_interval` as a calendar duration.
    refill_interval: chrono::Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    /// Current token count.
    level: u64,
    /// Last refill time.
    last_refill_at: DateTime<Utc>,
    /// Always `last_refill_at + refill_interval`.
    next_refill_at: DateTime<Utc>,
}

impl TokenBucket {
    /// Create a new, full token bucket.
    ///
    /// Fails when `capacity` or `refill_amount` is zero, or when the
    /// refill interval is too large to add to a timestamp.
    pub fn new(capacity: u64, refill_amount: u64, config: BucketConfig) -> BucketResult<Self> {
        Self::new_at(capacity, refill_amount, config, Utc::now())
    }

    /// Create a bucket from default config overridden by `options`, applied
    /// in order.
    pub fn with_options<I>(capacity: u64, refill_amount: u64, options: I) -> BucketResult<Self>
    where
        I: IntoIterator<Item = BucketOption>,
    {
        Self::new(capacity, refill_amount, BucketConfig::default().apply(options))
    }

    fn new_at(
        capacity: u64,
        refill_amount: u64,
        config: BucketConfig,
        now: DateTime<Utc>,
    ) -> BucketResult<Self> {
        let refill_interval = validate(capacity, refill_amount, &config)?;
        let next_refill_at = now.checked_add_signed(refill_interval).ok_or(
            BucketError::IntervalOutOfRange {
                interval: config.refill_interval,
            },
        )?;

        debug!(
            capacity,
            refill_amount,
            refill_interval_ms = u64::try_from(config.refill_interval.as_millis()).unwrap_or(u64::MAX),
            default_cost = config.default_cost,
            "token bucket created"
        );

        Ok(Self {
            capacity,
            refill_amount,
            config,
            refill_interval,
            state: Mutex::new(BucketState {
                level: capacity,
                last_refill_at: now,
                next_refill_at,
            }),
        })
    }

    /// Try to acquire `n` tokens.
    ///
    /// Returns `false` and leaves the level unchanged when fewer than `n`
    /// tokens are available. A cost of zero is always admitted.
    pub fn try_acquire(&self, n: u64) -> bool {
        self.try_acquire_at(n, Utc::now())
    }

    /// Try to acquire the configured default cost.
    pub fn try_acquire_default(&self) -> bool {
        self.try_acquire(self.config.default_cost)
    }

    fn try_acquire_at(&self, n: u64, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();

        self.refill(&mut state, now);

        if state.level < n {
            debug!(requested = n, available = state.level, "token bucket rejected");
            return false;
        }
        state.level -= n;

        true
    }

    /// Apply one refill step if the next tick is due.
    fn refill(&self, state: &mut BucketState, now: DateTime<Utc>) {
        if state.next_refill_at.timestamp() > now.timestamp() {
            return;
        }

        let level_before = state.level;
        state.level = state
            .level
            .saturating_add(self.refill_amount)
            .min(self.capacity);
        state.last_refill_at = now;
        state.next_refill_at = now
            .checked_add_signed(self.refill_interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        trace!(
            level_before,
            level_after = state.level,
            refill_amount = self.refill_amount,
            capacity = self.capacity,
            "token bucket refilled"
        );
    }

    /// Tokens currently in the bucket, without refilling.
    pub fn available(&self) -> u64 {
        self.state.lock().level
    }

    /// Maximum tokens the bucket can hold.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens added per refill tick.
    pub fn refill_amount(&self) -> u64 {
        self.refill_amount
    }

    /// Effective configuration.
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Time of the most recent refill, or of construction.
    pub fn last_refill_at(&self) -> DateTime<Utc> {
        self.state.lock().last_refill_at
    }

    /// Time at or after which the next refill is due.
    pub fn next_refill_at(&self) -> DateTime<Utc> {
        self.state.lock().next_refill_at
    }
}

/// Check bucket parameters and convert the refill interval.
pub(crate) fn validate(
    capacity: u64,
    refill_amount: u64,
    config: &BucketConfig,
) -> BucketResult<chrono::Duration> {
    if capacity == 0 {
        return Err(BucketError::ZeroCapacity);
    }
    if refill_amount == 0 {
        return Err(BucketError::ZeroRefillAmount);
    }

    chrono::Duration::from_std(config.refill_interval).map_err(|_| {
        BucketError::IntervalOutOfRange {
            interval: config.refill_interval,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::time::Duration;
    use test_case::test_case;

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn at(millis: i64) -> DateTime<Utc> {
        epoch() + chrono::Duration::milliseconds(millis)
    }

    fn bucket(capacity: u64, refill_amount: u64) -> TokenBucket {
        TokenBucket::new_at(capacity, refill_amount, BucketConfig::default(), epoch()).unwrap()
    }

    #[test]
    fn test_token_bucket_basic() {
        let bucket = bucket(5, 1);

        // Start full
        assert_eq!(bucket.available(), 5);
        assert_eq!(bucket.last_refill_at(), epoch());
        assert_eq!(bucket.next_refill_at(), at(1000));

        assert!(bucket.try_acquire_at(1, epoch()));
        assert!(bucket.try_acquire_at(1, epoch()));
        assert_eq!(bucket.available(), 3);
    }

    #[test]
    fn test_token_bucket_exhaustion() {
        let bucket = bucket(5, 1);

        for _ in 0..5 {
            assert!(bucket.try_acquire_at(1, epoch()));
        }
        assert!(!bucket.try_acquire_at(1, epoch()));
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_token_bucket_refill() {
        let bucket = bucket(5, 2);
        for _ in 0..5 {
            assert!(bucket.try_acquire_at(1, epoch()));
        }

        // Not due yet
        assert!(!bucket.try_acquire_at(1, at(999)));
        assert_eq!(bucket.available(), 0);

        // Refilled to 2 before the check, one deducted
        assert!(bucket.try_acquire_at(1, at(1000)));
        assert_eq!(bucket.available(), 1);
        assert_eq!(bucket.last_refill_at(), at(1000));
        assert_eq!(bucket.next_refill_at(), at(2000));
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let bucket = bucket(5, 4);
        assert!(bucket.try_acquire_at(2, epoch()));

        assert!(bucket.try_acquire_at(0, at(1000)));
        assert_eq!(bucket.available(), 5);
    }

    #[test]
    fn test_single_refill_after_long_idle() {
        let bucket = bucket(10, 2);
        assert!(bucket.try_acquire_at(10, epoch()));

        // Ten whole intervals idle still yields one tick
        assert!(bucket.try_acquire_at(0, at(10_000)));
        assert_eq!(bucket.available(), 2);
        assert_eq!(bucket.next_refill_at(), at(11_000));
    }

    #[test]
    fn test_refill_compares_whole_seconds() {
        // Created at .200, next tick at 1.200
        let bucket =
            TokenBucket::new_at(3, 1, BucketConfig::default(), at(200)).unwrap();
        assert!(bucket.try_acquire_at(3, at(200)));

        // Second 0 vs second 1
        assert!(!bucket.try_acquire_at(1, at(999)));

        // 1.100 is in the same second as 1.200, so the tick is due
        assert!(bucket.try_acquire_at(1, at(1100)));
        assert_eq!(bucket.next_refill_at(), at(2100));
    }

    #[test]
    fn test_sub_second_interval_fires_within_same_second() {
        let config = BucketConfig::new().with_refill_interval(Duration::from_millis(500));
        let bucket = TokenBucket::new_at(4, 1, config, at(100)).unwrap();
        assert!(bucket.try_acquire_at(4, at(100)));

        // next tick at .600 shares second 0 with now
        assert!(bucket.try_acquire_at(1, at(150)));
        assert_eq!(bucket.next_refill_at(), at(650));
    }

    #[test]
    fn test_zero_interval_refills_every_check() {
        let config = BucketConfig::new().with_refill_interval(Duration::ZERO);
        let bucket = TokenBucket::new_at(2, 1, config, epoch()).unwrap();

        assert!(bucket.try_acquire_at(2, epoch()));
        assert!(bucket.try_acquire_at(1, epoch()));
        assert!(bucket.try_acquire_at(1, epoch()));
    }

    #[test]
    fn test_acquire_multiple() {
        let bucket = bucket(5, 1);

        assert!(bucket.try_acquire_at(3, epoch()));
        assert_eq!(bucket.available(), 2);
        assert!(!bucket.try_acquire_at(3, epoch()));
        assert_eq!(bucket.available(), 2);
    }

    #[test]
    fn test_cost_above_refilled_level_rejected() {
        let bucket = bucket(5, 2);
        assert!(bucket.try_acquire_at(5, epoch()));

        // Refill to 2 does not reach 3
        assert!(!bucket.try_acquire_at(3, at(1000)));
        assert_eq!(bucket.available(), 2);
    }

    #[test]
    fn test_zero_cost_admitted_on_empty_bucket() {
        let bucket = bucket(1, 1);
        assert!(bucket.try_acquire_at(1, epoch()));

        assert!(bucket.try_acquire_at(0, epoch()));
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_default_cost() {
        let config = BucketConfig::new()
            .with_default_cost(2)
            .with_refill_interval(Duration::from_secs(3600));
        let bucket = TokenBucket::new(5, 1, config).unwrap();

        assert!(bucket.try_acquire_default());
        assert!(bucket.try_acquire_default());
        assert_eq!(bucket.available(), 1);
        assert!(!bucket.try_acquire_default());
        assert_eq!(bucket.available(), 1);
    }

    #[test]
    fn test_with_options() {
        let bucket = TokenBucket::with_options(
            5,
            1,
            [
                BucketOption::DefaultCost(3),
                BucketOption::RefillInterval(Duration::from_secs(10)),
            ],
        )
        .unwrap();

        assert_eq!(bucket.config().default_cost, 3);
        assert_eq!(bucket.config().refill_interval, Duration::from_secs(10));
        assert_eq!(
            bucket.next_refill_at() - bucket.last_refill_at(),
            chrono::Duration::seconds(10)
        );
    }

    #[test_case(0, 1, BucketError::ZeroCapacity ; "zero capacity")]
    #[test_case(1, 0, BucketError::ZeroRefillAmount ; "zero refill amount")]
    fn test_rejects_invalid_parameters(capacity: u64, refill: u64, expected: BucketError) {
        let err = TokenBucket::new(capacity, refill, BucketConfig::default()).unwrap_err();
        assert_eq!(err, expected);
    }

    #[test]
    fn test_rejects_huge_interval() {
        let config = BucketConfig::new().with_refill_interval(Duration::from_secs(u64::MAX));
        let err = TokenBucket::new(1, 1, config).unwrap_err();
        assert!(matches!(err, BucketError::IntervalOutOfRange { .. }));
    }

    #[test]
    fn test_long_interval_accepted() {
        let interval = Duration::from_secs(100 * 365 * 24 * 3600);
        let config = BucketConfig::new().with_refill_interval(interval);
        let bucket = TokenBucket::new_at(1, 1, config, epoch()).unwrap();

        assert_eq!(bucket.config().refill_interval, interval);
        assert!(bucket.try_acquire_at(1, at(5000)));
        assert!(!bucket.try_acquire_at(1, at(10_000)));
    }

    #[test]
    fn test_accessors() {
        let bucket = bucket(7, 3);
        assert_eq!(bucket.capacity(), 7);
        assert_eq!(bucket.refill_amount(), 3);
        assert_eq!(bucket.config(), &BucketConfig::default());
    }

    proptest! {
        #[test]
        fn test_level_tracks_model(
            capacity in 1u64..20,
            refill_amount in 1u64..10,
            ops in prop::collection::vec((0u64..25, 0i64..2500), 1..60),
        ) {
            let bucket = bucket(capacity, refill_amount);
            let mut now = epoch();
            let mut next = at(1000);
            let mut level = capacity;

            for (cost, advance_ms) in ops {
                now = now + chrono::Duration::milliseconds(advance_ms);
                if next.timestamp() <= now.timestamp() {
                    level = (level + refill_amount).min(capacity);
                    next = now + chrono::Duration::seconds(1);
                }

                let before = level;
                let admitted = bucket.try_acquire_at(cost, now);
                prop_assert_eq!(admitted, before >= cost);
                if admitted {
                    level -= cost;
                }

                prop_assert_eq!(bucket.available(), level);
                prop_assert!(bucket.available() <= capacity);
            }
        }
    }
}
