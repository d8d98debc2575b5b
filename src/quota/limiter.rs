use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of one burst-window attempt. `retry_after` is only set on denial:
/// the time until the oldest hit in the window falls out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after: Option<Duration>,
}

struct RateWindow {
    hits: VecDeque<Instant>,
    // Stamped on every acquire so the sweeper knows when a key has gone idle.
    window: Duration,
}

/// key: admission-limiter -> per-(scope, client) sliding windows
///
/// Purely in-process and intentionally not persisted; restart loss is
/// accepted. One instance is built at startup and injected wherever burst
/// protection is needed, so tests get isolated limiters for free.
pub struct RequestAdmissionLimiter {
    windows: DashMap<String, RateWindow>,
}

impl RequestAdmissionLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Record an attempt for `(scope, client_id)` iff fewer than `limit` hits
    /// are inside the trailing `window`. Expired hits are pruned lazily here;
    /// keys serialize independently through the map's entry lock.
    pub fn try_acquire(
        &self,
        scope: &str,
        client_id: &str,
        limit: u32,
        window: Duration,
    ) -> RateDecision {
        let key = format!("{scope}:{client_id}");
        let now = Instant::now();
        let mut entry = self.windows.entry(key).or_insert_with(|| RateWindow {
            hits: VecDeque::with_capacity(limit as usize),
            window,
        });
        let state = entry.value_mut();
        state.window = window;

        while let Some(front) = state.hits.front() {
            if now.duration_since(*front) >= window {
                state.hits.pop_front();
            } else {
                break;
            }
        }

        if (state.hits.len() as u32) < limit {
            state.hits.push_back(now);
            RateDecision {
                allowed: true,
                limit,
                remaining: limit - state.hits.len() as u32,
                retry_after: None,
            }
        } else {
            let retry_after = state
                .hits
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)));
            RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                retry_after,
            }
        }
    }

    /// Evict keys whose whole window has gone idle. Correctness never needs
    /// this (pruning is lazy); it only bounds memory for clients that never
    /// come back.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.windows.retain(|_, state| match state.hits.back() {
            Some(last) => now.duration_since(*last) < state.window,
            None => false,
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RequestAdmissionLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn five_per_second_then_denied() {
        let limiter = RequestAdmissionLimiter::new();
        let window = Duration::from_millis(1000);

        for expected_remaining in (0..5).rev() {
            let decision = limiter.try_acquire("ai-chat", "203.0.113.9", 5, window);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.retry_after, None);
        }

        let denied = limiter.try_acquire("ai-chat", "203.0.113.9", 5, window);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        let retry_after = denied.retry_after.expect("denials carry a retry hint");
        assert!(retry_after <= window);
    }

    #[tokio::test]
    async fn window_elapsing_readmits() {
        let limiter = RequestAdmissionLimiter::new();
        let window = Duration::from_millis(100);

        assert!(limiter.try_acquire("upload", "c1", 2, window).allowed);
        assert!(limiter.try_acquire("upload", "c1", 2, window).allowed);
        assert!(!limiter.try_acquire("upload", "c1", 2, window).allowed);

        sleep(Duration::from_millis(150)).await;

        assert!(limiter.try_acquire("upload", "c1", 2, window).allowed);
    }

    #[tokio::test]
    async fn keys_do_not_contend() {
        let limiter = RequestAdmissionLimiter::new();
        let window = Duration::from_secs(60);

        assert!(limiter.try_acquire("api", "client-a", 1, window).allowed);
        assert!(!limiter.try_acquire("api", "client-a", 1, window).allowed);
        // Same client under another scope, and another client under the same
        // scope, both have their own windows.
        assert!(limiter.try_acquire("upload", "client-a", 1, window).allowed);
        assert!(limiter.try_acquire("api", "client-b", 1, window).allowed);
    }

    #[tokio::test]
    async fn sweep_evicts_only_idle_keys() {
        let limiter = RequestAdmissionLimiter::new();

        limiter.try_acquire("api", "stale", 5, Duration::from_millis(50));
        limiter.try_acquire("api", "fresh", 5, Duration::from_secs(60));
        assert_eq!(limiter.tracked_keys(), 2);

        sleep(Duration::from_millis(80)).await;
        limiter.sweep();

        assert_eq!(limiter.tracked_keys(), 1);
        // The surviving key still has its hit on record.
        let decision = limiter.try_acquire("api", "fresh", 5, Duration::from_secs(60));
        assert_eq!(decision.remaining, 3);
    }
}
