//! Per-source memoization of successful upstream results.
//!
//! [`ResultCache::get_or_compute`] returns the stored value for a key or
//! runs the supplied computation and stores its result. Only successes are
//! stored; an error is handed back to the caller and the next call for the
//! same key computes again.
//!
//! Entries have no TTL. They live until pushed out by capacity pressure
//! (least-recently-used first) or until the process restarts, so a
//! long-running server can serve stale upstream data for a hot cell.
//!
//! Concurrent misses on the same key are collapsed: the first caller
//! computes while later callers wait on a per-key in-flight lock, then
//! re-check the cache. If the first computation fails or is cancelled the
//! next waiter computes afresh. The in-flight entry for a key is counted
//! under the map lock and removed when its last caller leaves, including
//! callers whose future is dropped mid-flight.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
#[cfg(test)]
use std::time::Duration;
use std::time::Instant;

use lru::LruCache;
use smallbiz_map_features_models::CacheStats;

/// A stored value and when it was inserted.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Callers currently computing or waiting on one key.
#[derive(Debug, Default)]
struct Flight {
    lock: Arc<tokio::sync::Mutex<()>>,
    callers: usize,
}

type FlightMap<K> = Mutex<HashMap<K, Flight>>;

/// One caller's membership in a [`Flight`]; leaves it on drop.
struct FlightTicket<'a, K: Hash + Eq> {
    flights: &'a FlightMap<K>,
    key: K,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<K: Hash + Eq> Drop for FlightTicket<'_, K> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = flights.get_mut(&self.key) {
            flight.callers = flight.callers.saturating_sub(1);
            if flight.callers == 0 {
                flights.remove(&self.key);
            }
        }
    }
}

/// Bounded LRU cache with single-flight computation.
#[derive(Debug)]
pub struct ResultCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    in_flight: FlightMap<K>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> ResultCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached value for `key`, or runs `compute` and caches its
    /// result if it succeeds.
    ///
    /// # Errors
    ///
    /// Returns whatever error `compute` returned. The error is not cached.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.lookup(&key) {
            return Ok(value);
        }

        let ticket = self.join_flight(&key);
        let _turn = ticket.lock.lock().await;
        if let Some(value) = self.lookup(&key) {
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = compute().await;
        if let Ok(value) = &result {
            self.insert(key, value.clone());
        }
        result
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries().cap().get()
    }

    /// Occupancy and hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries();
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &K) -> Option<V> {
        let mut entries = self.entries();
        let entry = entries.get(key)?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        log::trace!("cache hit, entry age {:?}", entry.inserted_at.elapsed());
        Some(entry.value.clone())
    }

    fn insert(&self, key: K, value: V) {
        let evicted = self.entries().push(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        if evicted.is_some() {
            log::trace!("cache at capacity, evicted least recently used entry");
        }
    }

    fn join_flight(&self, key: &K) -> FlightTicket<'_, K> {
        let mut flights = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let flight = flights.entry(key.clone()).or_default();
        flight.callers += 1;
        FlightTicket {
            flights: &self.in_flight,
            key: key.clone(),
            lock: Arc::clone(&flight.lock),
        }
    }

    #[cfg(test)]
    fn contains(&self, key: &K) -> bool {
        self.entries().contains(key)
    }

    #[cfg(test)]
    fn age_of(&self, key: &K) -> Option<Duration> {
        self.entries()
            .peek(key)
            .map(|entry| entry.inserted_at.elapsed())
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
