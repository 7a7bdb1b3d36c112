use gopher_social::ratelimiter::{
    FixedWindowRateLimiter, Limiter, ManualClock, RateLimiterConfig,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

fn limiter(requests: u32, window_secs: u64) -> (FixedWindowRateLimiter, ManualClock) {
    let clock = ManualClock::new();
    let limiter = FixedWindowRateLimiter::with_clock(
        RateLimiterConfig {
            requests_per_window: requests,
            window: Duration::from_secs(window_secs),
            enabled: true,
        },
        Arc::new(clock.clone()),
    );
    (limiter, clock)
}

#[test]
fn test_admits_up_to_limit_then_denies() {
    let (limiter, _clock) = limiter(5, 60);

    for i in 0..5 {
        let (allowed, retry_after) = limiter.allow("10.0.0.1");
        assert!(allowed, "request {} should be admitted", i + 1);
        assert_eq!(retry_after, Duration::ZERO);
    }

    let (allowed, retry_after) = limiter.allow("10.0.0.1");
    assert!(!allowed);
    assert_eq!(retry_after, Duration::from_secs(60));
}

#[test]
fn test_keys_are_counted_independently() {
    let (limiter, _clock) = limiter(1, 60);

    assert!(limiter.allow("10.0.0.1").0);
    assert!(!limiter.allow("10.0.0.1").0);
    assert!(limiter.allow("10.0.0.2").0);
    assert_eq!(limiter.tracked_keys(), 2);
}

#[test]
fn test_window_expiry_resets_the_count() {
    let (limiter, clock) = limiter(2, 60);

    assert!(limiter.allow("client").0);
    assert!(limiter.allow("client").0);
    assert!(!limiter.allow("client").0);

    // Still inside the window.
    clock.advance(Duration::from_secs(59));
    assert!(!limiter.allow("client").0);

    clock.advance(Duration::from_secs(1));
    assert!(limiter.allow("client").0);
    assert!(limiter.allow("client").0);
    assert!(!limiter.allow("client").0);
}

#[test]
fn test_disabled_limiter_always_admits() {
    let limiter = FixedWindowRateLimiter::new(RateLimiterConfig {
        requests_per_window: 1,
        window: Duration::from_secs(60),
        enabled: false,
    });

    for _ in 0..100 {
        assert_eq!(limiter.allow("client"), (true, Duration::ZERO));
    }
    assert_eq!(limiter.tracked_keys(), 0);
}

#[test]
fn test_zero_limit_denies_everything() {
    let (limiter, _clock) = limiter(0, 30);

    let (allowed, retry_after) = limiter.allow("client");
    assert!(!allowed);
    assert_eq!(retry_after, Duration::from_secs(30));
    assert_eq!(limiter.tracked_keys(), 0);
}

#[test]
fn test_purge_removes_only_expired_windows() {
    let (limiter, clock) = limiter(3, 60);

    limiter.allow("old");
    clock.advance(Duration::from_secs(30));
    limiter.allow("fresh");
    assert_eq!(limiter.tracked_keys(), 2);

    clock.advance(Duration::from_secs(30));
    assert_eq!(limiter.purge_expired(), 1);
    assert_eq!(limiter.tracked_keys(), 1);

    // "fresh" keeps its count across the purge.
    assert!(limiter.allow("fresh").0);
    assert!(limiter.allow("fresh").0);
    assert!(!limiter.allow("fresh").0);
}

#[test]
fn test_concurrent_callers_admit_exactly_the_limit() {
    let (limiter, _clock) = limiter(20, 60);
    let limiter = Arc::new(limiter);
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            thread::spawn(move || {
                if limiter.allow("shared").0 {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("caller thread panicked");
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 20);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_purges_idle_windows() {
    let (limiter, clock) = limiter(5, 60);
    let limiter = Arc::new(limiter);
    let sweeper = limiter.spawn_sweeper();

    limiter.allow("idle");
    assert_eq!(limiter.tracked_keys(), 1);

    clock.advance(Duration::from_secs(61));
    // Let the interval fire on the paused runtime clock.
    tokio::time::sleep(Duration::from_secs(61)).await;
    tokio::task::yield_now().await;

    assert_eq!(limiter.tracked_keys(), 0);
    sweeper.abort();
}

#[test]
fn test_zero_window_still_limits() {
    let (limiter, _clock) = limiter(2, 0);

    let admitted = (0..50).filter(|_| limiter.allow("client").0).count();
    assert_eq!(admitted, 2);

    let (allowed, retry_after) = limiter.allow("client");
    assert!(!allowed);
    assert_eq!(retry_after, gopher_social::ratelimiter::MIN_WINDOW);
}
