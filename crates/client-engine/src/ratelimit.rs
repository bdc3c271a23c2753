//! Registry of the microblog API's own rate-limit headers, keyed by logical endpoint (§4.2).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Last-observed rate-limit state for one endpoint, parsed from
/// `x-rate-limit-{limit,remaining,reset}` response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    /// `x-rate-limit-limit`.
    pub limit: u32,
    /// `x-rate-limit-remaining`.
    pub remaining: u32,
    /// `x-rate-limit-reset`, Unix seconds.
    pub reset_unix_seconds: u64,
    /// Wall-clock time this entry was last updated.
    pub last_seen: std::time::Instant,
}

/// Tracks [`RateLimitInfo`] per logical endpoint name (e.g. `users/mentions`).
#[derive(Debug, Default)]
pub struct RateLimitRegistry {
    endpoints: Mutex<HashMap<String, RateLimitInfo>>,
}

impl RateLimitRegistry {
    /// An empty registry; every endpoint starts with no recorded state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response's rate-limit headers for `endpoint`. Called unconditionally on
    /// every response, success or failure.
    pub fn observe(&self, endpoint: &str, limit: u32, remaining: u32, reset_unix_seconds: u64) {
        let mut endpoints = self.endpoints.lock().expect("rate limit registry poisoned");
        endpoints.insert(
            endpoint.to_string(),
            RateLimitInfo {
                limit,
                remaining,
                reset_unix_seconds,
                last_seen: std::time::Instant::now(),
            },
        );
    }

    /// Current `remaining` for `endpoint`, if any response has been observed.
    pub fn remaining(&self, endpoint: &str) -> Option<u32> {
        self.endpoints
            .lock()
            .expect("rate limit registry poisoned")
            .get(endpoint)
            .map(|info| info.remaining)
    }

    /// If `endpoint`'s last-observed `remaining` is below `min_remaining`, the duration the
    /// caller should sleep before calling again (`reset + 5s` minus now, floored at zero).
    /// Returns `None` if the endpoint may be called immediately.
    pub fn sleep_until_safe(&self, endpoint: &str, min_remaining: u32) -> Option<Duration> {
        let endpoints = self.endpoints.lock().expect("rate limit registry poisoned");
        let info = endpoints.get(endpoint)?;
        if info.remaining >= min_remaining {
            return None;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let wake_at = info.reset_unix_seconds + 5;
        Some(Duration::from_secs(wake_at.saturating_sub(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_no_wait_before_any_observation() {
        let registry = RateLimitRegistry::new();
        assert!(registry.sleep_until_safe("users/mentions", 2).is_none());
    }

    #[test]
    fn reports_no_wait_when_remaining_is_above_floor() {
        let registry = RateLimitRegistry::new();
        registry.observe("users/mentions", 15, 10, 0);
        assert!(registry.sleep_until_safe("users/mentions", 2).is_none());
    }

    #[test]
    fn reports_a_wait_when_remaining_is_below_floor() {
        let registry = RateLimitRegistry::new();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        registry.observe("users/mentions", 15, 1, now + 60);
        let wait = registry.sleep_until_safe("users/mentions", 2).unwrap();
        assert!(wait.as_secs() >= 60 && wait.as_secs() <= 65);
    }

    #[test]
    fn tracks_remaining_independently_per_endpoint() {
        let registry = RateLimitRegistry::new();
        registry.observe("users/mentions", 15, 10, 0);
        registry.observe("tweets", 300, 5, 0);
        assert_eq!(registry.remaining("users/mentions"), Some(10));
        assert_eq!(registry.remaining("tweets"), Some(5));
    }
}
