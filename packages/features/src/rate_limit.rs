//! Sliding-window rate limiter for outbound upstream calls.
//!
//! Each source gets its own [`RateLimiter`] allowing at most `calls`
//! acquisitions within any trailing `period`. Callers that arrive while the
//! window is full wait (in arrival order) until the oldest call ages out.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Longest single sleep while waiting for a slot. A window that ends later
/// than this is re-checked after each slice.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(86_400);

/// Window size for one source: at most `calls` per `period_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum calls allowed within the window.
    pub calls: usize,
    /// Window length in milliseconds.
    pub period_ms: u64,
}

impl RateLimitPolicy {
    /// Builds a policy from a call count and a window length.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(calls: usize, period: Duration) -> Self {
        Self {
            calls,
            period_ms: period.as_millis() as u64,
        }
    }

    /// The window length.
    #[must_use]
    pub const fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Async sliding-window limiter.
///
/// The timestamp queue lives behind a fair async mutex which is held while
/// a caller waits for a slot, so waiters are admitted first-come
/// first-served.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter. A policy of zero calls is treated as one call per
    /// window; [`FeaturesConfig`](crate::FeaturesConfig) rejects such
    /// policies before they get here.
    #[must_use]
    pub fn new(policy: RateLimitPolicy) -> Self {
        let policy = RateLimitPolicy {
            calls: policy.calls.max(1),
            ..policy
        };
        Self {
            policy,
            calls: Mutex::new(VecDeque::with_capacity(policy.calls)),
        }
    }

    /// The policy this limiter enforces.
    #[must_use]
    pub const fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Waits until a slot is free in the current window, then takes it.
    pub async fn acquire(&self) {
        let period = self.policy.period();
        let mut calls = self.calls.lock().await;

        loop {
            let now = Instant::now();
            while calls
                .front()
                .is_some_and(|oldest| now.duration_since(*oldest) >= period)
            {
                calls.pop_front();
            }

            if calls.len() < self.policy.calls {
                calls.push_back(now);
                return;
            }

            let Some(oldest) = calls.front().copied() else {
                continue;
            };
            let ready_at = oldest
                .checked_add(period)
                .map_or(now + MAX_WAIT_SLICE, |at| at.min(now + MAX_WAIT_SLICE));
            log::trace!(
                "rate limit reached ({} per {period:?}), waiting {:?}",
                self.policy.calls,
                ready_at.saturating_duration_since(now),
            );
            tokio::time::sleep_until(ready_at).await;
        }
    }

    #[cfg(test)]
    async fn in_window(&self) -> usize {
        let period = self.policy.period();
        let now = Instant::now();
        self.calls
            .lock()
            .await
            .iter()
            .filter(|t| now.duration_since(**t) < period)
            .count()
    }
}
