//! Rate limiter and result cache for one upstream source.

use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;

use smallbiz_map_features_models::{CacheStats, SourceName};

use crate::FetchError;
use crate::cache::ResultCache;
use crate::config::SourcePolicy;
use crate::rate_limit::RateLimiter;

/// The guarded path to one upstream source.
///
/// Every call takes a rate-limit slot first and then consults the cache,
/// so cached answers are also paced by the source's window.
#[derive(Debug)]
pub struct SourceChannel<K: Hash + Eq, V> {
    name: SourceName,
    limiter: RateLimiter,
    cache: ResultCache<K, V>,
}

impl<K, V> SourceChannel<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Builds the limiter and cache described by `policy`.
    #[must_use]
    pub fn new(name: SourceName, policy: &SourcePolicy) -> Self {
        let capacity = policy.cache_capacity().unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            limiter: RateLimiter::new(policy.rate_limit),
            cache: ResultCache::new(capacity),
        }
    }

    /// The source this channel guards.
    #[must_use]
    pub const fn name(&self) -> SourceName {
        self.name
    }

    /// Waits for a rate-limit slot, then returns the cached value for `key`
    /// or runs `fetch` and caches its result on success.
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] produced by `fetch`.
    pub async fn call<F, Fut>(&self, key: K, fetch: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        self.limiter.acquire().await;
        self.cache.get_or_compute(key, fetch).await
    }

    /// Cache counters for this source.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::rate_limit::RateLimitPolicy;

    fn policy(calls: usize) -> SourcePolicy {
        SourcePolicy {
            base_url: "http://localhost".to_string(),
            timeout_secs: 5,
            cache_capacity: 4,
            max_retries: 0,
            rate_limit: RateLimitPolicy::new(calls, Duration::from_secs(1)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cached_calls_still_take_a_slot() {
        let channel: SourceChannel<u32, u32> = SourceChannel::new(SourceName::Poi, &policy(1));
        let fetches = AtomicUsize::new(0);
        let counter = &fetches;
        let start = Instant::now();

        for _ in 0..3 {
            let value = channel
                .call(1, || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(10)
                })
                .await;
            assert_eq!(value, Ok(10));
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(channel.stats().hits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_pass_through_uncached() {
        let channel: SourceChannel<u32, u32> = SourceChannel::new(SourceName::Crime, &policy(10));
        let err = FetchError::Transport {
            message: "timed out".to_string(),
        };

        let first = channel.call(1, || async { Err(err.clone()) }).await;
        assert_eq!(first, Err(err.clone()));
        assert_eq!(channel.stats().entries, 0);
        assert_eq!(channel.name(), SourceName::Crime);
    }
}
