//! Per-key rate limiting for liveness checks.
//!
//! Each key (account id) tracks its own last-call time, so concurrently
//! running recorder units never serialize through one shared timestamp.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const MIN_DELAY_FLOOR: Duration = Duration::from_secs(1);

/// Per-key minimum-delay gate shared across recorder units.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: RwLock<Duration>,
    last_call: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given minimum delay, clamped to ≥ 1s.
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay: RwLock::new(min_delay.max(MIN_DELAY_FLOOR)),
            last_call: Mutex::new(HashMap::new()),
        }
    }

    /// Current minimum delay between same-key acquisitions.
    pub fn min_delay(&self) -> Duration {
        *self.min_delay.read()
    }

    /// Change the minimum delay at runtime, clamped to ≥ 1s.
    pub fn set_min_delay(&self, min_delay: Duration) {
        *self.min_delay.write() = min_delay.max(MIN_DELAY_FLOOR);
    }

    /// Block until at least `min_delay` has passed since the previous
    /// `acquire_for` call with the same key returned. Distinct keys never
    /// block each other.
    ///
    /// # Cancel Safety
    ///
    /// This method is cancel-safe: the map lock is released before sleeping,
    /// and the timestamp is only committed once the wait has completed. A
    /// dropped future leaves the previous timestamp in place.
    pub async fn acquire_for(&self, key: &str) {
        let min_delay = self.min_delay();

        // Compute the required wait under the lock, sleep outside it so one
        // key's cool-down cannot block another key's lookup.
        let wait = {
            let last_call = self.last_call.lock().await;
            last_call
                .get(key)
                .map(|last| min_delay.saturating_sub(last.elapsed()))
                .unwrap_or(Duration::ZERO)
        };

        if !wait.is_zero() {
            debug!(key, wait = ?wait, "rate limiter waiting");
            tokio::time::sleep(wait).await;
        }

        self.last_call
            .lock()
            .await
            .insert(key.to_string(), Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_min_delay_clamped() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        assert_eq!(limiter.min_delay(), Duration::from_secs(1));

        limiter.set_min_delay(Duration::from_secs(30));
        assert_eq!(limiter.min_delay(), Duration::from_secs(30));

        limiter.set_min_delay(Duration::ZERO);
        assert_eq!(limiter.min_delay(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_spaced_by_min_delay() {
        let limiter = RateLimiter::new(Duration::from_secs(1));

        limiter.acquire_for("a").await;
        let before = Instant::now();
        limiter.acquire_for("a").await;
        assert!(before.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_block() {
        let limiter = RateLimiter::new(Duration::from_secs(1));

        limiter.acquire_for("a").await;
        // "b" has no cool-down window to wait on; paused time must not move.
        let before = Instant::now();
        limiter.acquire_for("b").await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_do_not_deadlock() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));

        let mut handles = Vec::new();
        for i in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("key-{}", i % 2);
                limiter.acquire_for(&key).await;
                limiter.acquire_for(&key).await;
            }));
        }

        let result =
            tokio::time::timeout(Duration::from_secs(30), futures::future::join_all(handles))
                .await;
        assert!(result.is_ok(), "concurrent acquires should not deadlock");
    }
}
