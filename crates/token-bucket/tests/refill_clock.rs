//! Refill against the real system clock.

use std::thread::sleep;
use std::time::Duration;
use token_bucket::{BucketOption, TokenBucket};

#[test]
fn test_refill_after_interval() {
    token_bucket_log::init_for_tests();

    let bucket = TokenBucket::with_options(
        5,
        2,
        [BucketOption::RefillInterval(Duration::from_secs(1))],
    )
    .unwrap();

    while bucket.try_acquire(1) {}
    assert_eq!(bucket.available(), 0);

    // Past the next whole-second boundary
    sleep(Duration::from_millis(2100));

    assert!(bucket.try_acquire(1));
    assert_eq!(bucket.available(), 1);
}

#[test]
fn test_no_refill_before_interval() {
    let bucket = TokenBucket::with_options(
        3,
        3,
        [BucketOption::RefillInterval(Duration::from_secs(3600))],
    )
    .unwrap();

    assert!(bucket.try_acquire(3));
    sleep(Duration::from_millis(50));
    assert!(!bucket.try_acquire(1));
    assert!(bucket.next_refill_at() > bucket.last_refill_at());
}
