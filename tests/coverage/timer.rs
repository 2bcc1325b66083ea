use obsctl::{RetryPolicy, TimerQueue};
use std::time::{Duration, Instant};

#[test]
fn test_timers_expire_in_deadline_order() {
    let start = Instant::now();
    let mut timers = TimerQueue::new();
    timers.schedule(start + Duration::from_secs(3), "third");
    timers.schedule(start + Duration::from_secs(1), "first");
    timers.schedule(start + Duration::from_secs(2), "second");

    assert_eq!(timers.len(), 3);
    assert_eq!(timers.next_deadline(), Some(start + Duration::from_secs(1)));
    assert_eq!(
        timers.pop_expired(start + Duration::from_secs(2)),
        vec!["first", "second"]
    );
    assert_eq!(timers.len(), 1);
    assert!(timers.pop_expired(start).is_empty());
}

#[test]
fn test_cancelled_timer_never_fires() {
    let start = Instant::now();
    let mut timers = TimerQueue::new();
    let early = timers.schedule(start + Duration::from_secs(1), 1);
    timers.schedule(start + Duration::from_secs(5), 2);

    assert_eq!(timers.cancel(early), Some(1));
    assert_eq!(timers.cancel(early), None);
    assert_eq!(timers.next_deadline(), Some(start + Duration::from_secs(5)));
    assert_eq!(timers.pop_expired(start + Duration::from_secs(10)), vec![2]);
    assert!(timers.is_empty());
    assert_eq!(timers.next_deadline(), None);
}

#[test]
fn test_retry_policy_budget() {
    let policy = RetryPolicy::new(Duration::from_millis(250), 3);
    let now = Instant::now();
    assert_eq!(policy.next_attempt(now), now + Duration::from_millis(250));
    assert!(!policy.exhausted(2));
    assert!(policy.exhausted(3));

    let default = RetryPolicy::default();
    assert_eq!(default.interval, Duration::from_secs(5));
    assert_eq!(default.max_retries, 5);
}

