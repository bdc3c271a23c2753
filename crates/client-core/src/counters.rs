//! Observability counters exposed to the external health/metrics surface (§6, §10).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Monotonic counters updated by the scheduler and reply pipeline, read by the external
/// health/metrics HTTP server. This crate never starts that server itself — it only owns the
/// counters and a `snapshot()` method for whoever does.
#[derive(Debug, Default)]
pub struct Counters {
    processed: AtomicU64,
    replies_sent: AtomicU64,
    ai_fail: AtomicU64,
    post_fail: AtomicU64,
    rate_limited_in: AtomicU64,
    rate_limited_out: AtomicU64,
    skip_absent_target: AtomicU64,
    last_mention_time_unix: AtomicI64,
}

/// Plain-data snapshot of [`Counters`], serializable for the external metrics surface.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CountersSnapshot {
    /// Mentions whose outcome is final (replied, text-fallback, or terminally skipped).
    pub processed: u64,
    /// Replies with an attached image that were successfully posted.
    pub replies_sent: u64,
    /// Mentions that fell back to a text-only reply after exhausting transform attempts.
    pub ai_fail: u64,
    /// Mentions left unprocessed after a terminal media-upload/post failure.
    pub post_fail: u64,
    /// Mentions skipped because the incoming (per-author) limiter rejected them.
    pub rate_limited_in: u64,
    /// Mentions marked processed because the outgoing (per-target) limiter rejected them.
    pub rate_limited_out: u64,
    /// Mentions marked processed because the target user could not be resolved.
    pub skip_absent_target: u64,
    /// Unix timestamp of the most recently observed mention, if any.
    pub last_mention_time_unix: Option<i64>,
}

impl Counters {
    /// Construct a fresh, zeroed counter set behind an `Arc` for sharing across the scheduler
    /// and concurrent reply pipelines.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a mention reaching a terminal outcome.
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful image reply.
    pub fn record_reply_sent(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a text-only fallback after exhausting transform attempts.
    pub fn record_ai_fail(&self) {
        self.ai_fail.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a terminal post failure (mention left unprocessed).
    pub fn record_post_fail(&self) {
        self.post_fail.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an incoming-limiter rejection.
    pub fn record_rate_limited_in(&self) {
        self.rate_limited_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an outgoing-limiter rejection.
    pub fn record_rate_limited_out(&self) {
        self.rate_limited_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a skip due to an unresolvable target user.
    pub fn record_skip_absent_target(&self) {
        self.skip_absent_target.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the creation timestamp of the most recently observed mention.
    pub fn record_mention_seen(&self, created_at_unix: i64) {
        self.last_mention_time_unix
            .store(created_at_unix, Ordering::Relaxed);
    }

    /// A point-in-time, serializable view of all counters.
    pub fn snapshot(&self) -> CountersSnapshot {
        let last_mention_time_unix = match self.last_mention_time_unix.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        };
        CountersSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            ai_fail: self.ai_fail.load(Ordering::Relaxed),
            post_fail: self.post_fail.load(Ordering::Relaxed),
            rate_limited_in: self.rate_limited_in.load(Ordering::Relaxed),
            rate_limited_out: self.rate_limited_out.load(Ordering::Relaxed),
            skip_absent_target: self.skip_absent_target.load(Ordering::Relaxed),
            last_mention_time_unix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let counters = Counters::new();
        counters.record_processed();
        counters.record_reply_sent();
        counters.record_mention_seen(12345);

        let snap = counters.snapshot();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.replies_sent, 1);
        assert_eq!(snap.last_mention_time_unix, Some(12345));
        assert_eq!(snap.ai_fail, 0);
    }
}
