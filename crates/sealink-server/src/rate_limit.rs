//! Rolling-window rate limiter.
//!
//! One limiter instance per limited operation (handshakes per transport
//! address, messages per identity). Buckets hold the timestamps inside the
//! current window, so memory per key is bounded by the per-window maximum.
//!
//! Keys are transport addresses or identity ids; multiple connections
//! sharing an address intentionally share a bucket.

use std::collections::{HashMap, VecDeque};

/// Rolling-window counter keyed by client id.
#[derive(Debug)]
pub struct RateLimiter {
    window_ms: u64,
    max_per_window: u32,
    buckets: HashMap<String, VecDeque<u64>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_per_window` events per `window_ms`.
    pub fn new(window_ms: u64, max_per_window: u32) -> Self {
        Self { window_ms, max_per_window, buckets: HashMap::new() }
    }

    /// Record an event for `key` and report whether it is within budget.
    ///
    /// Rejected events are not recorded; a peer cannot extend its own
    /// penalty by hammering.
    pub fn check(&mut self, key: &str, now_ms: u64) -> bool {
        let bucket = self.buckets.entry(key.to_string()).or_default();

        let window_start = now_ms.saturating_sub(self.window_ms);
        while bucket.front().is_some_and(|&at| at <= window_start) {
            bucket.pop_front();
        }

        if bucket.len() >= self.max_per_window as usize {
            return false;
        }

        bucket.push_back(now_ms);
        true
    }

    /// Drop buckets idle for more than twice the window.
    pub fn gc(&mut self, now_ms: u64) {
        let idle_cutoff = now_ms.saturating_sub(self.window_ms.saturating_mul(2));
        self.buckets
            .retain(|_, bucket| bucket.back().is_some_and(|&last| last > idle_cutoff));
    }

    /// Number of tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_window_maximum() {
        let mut limiter = RateLimiter::new(60_000, 10);

        for i in 0..10 {
            assert!(limiter.check("198.51.100.7", 1000 + i), "event {i} within budget");
        }
        assert!(!limiter.check("198.51.100.7", 1011), "eleventh event rejected");
    }

    #[test]
    fn window_rolls_forward() {
        let mut limiter = RateLimiter::new(60_000, 2);

        assert!(limiter.check("k", 0));
        assert!(limiter.check("k", 1000));
        assert!(!limiter.check("k", 2000));

        // The first event leaves the window; room for one more.
        assert!(limiter.check("k", 60_001));
        assert!(!limiter.check("k", 60_500));
    }

    #[test]
    fn keys_are_independent() {
        let mut limiter = RateLimiter::new(60_000, 1);

        assert!(limiter.check("a", 0));
        assert!(limiter.check("b", 0));
        assert!(!limiter.check("a", 1));
    }

    #[test]
    fn rejected_events_do_not_extend_the_penalty() {
        let mut limiter = RateLimiter::new(1_000, 1);

        assert!(limiter.check("k", 0));
        assert!(!limiter.check("k", 500));
        assert!(!limiter.check("k", 900));

        // Only the accepted event at t=0 counts; the window clears at
        // t=1000 regardless of the rejected attempts.
        assert!(limiter.check("k", 1_001));
    }

    #[test]
    fn gc_drops_idle_buckets_after_two_windows() {
        let mut limiter = RateLimiter::new(1_000, 5);

        limiter.check("old", 0);
        limiter.check("fresh", 1_900);
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.gc(2_100);
        assert_eq!(limiter.tracked_keys(), 1);

        limiter.gc(4_000);
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
