//! Single-flight async cache with TTL expiry and LRU eviction.
//!
//! The cache is the shared substrate for expensive or duplicate-prone
//! computations. Concurrent callers requesting the same missing key all
//! receive the result of a single factory invocation, whether it succeeded or
//! failed. Failures are cached for a short retry interval so a storm of
//! callers against a failing dependency does not re-invoke the factory on
//! every call.

use crate::application::metrics::Metrics;
use crate::application::ports::{CleanupTarget, Clock};
use crate::config::{require_nonzero_duration, require_positive, ConfigError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Error produced by a cache factory, shared identically with every waiter.
///
/// Cloneable so that a single failure can be handed to all concurrent
/// callers of `get_or_create` and cached as a negative result.
#[derive(Debug, Clone)]
pub struct FactoryError {
    inner: Arc<dyn std::error::Error + Send + Sync>,
}

impl FactoryError {
    fn new(source: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self {
            inner: source.into(),
        }
    }
}

impl fmt::Display for FactoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for FactoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Configuration for an [`AsyncCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub max_size: usize,
    /// How long successful values stay fresh.
    pub ttl: Duration,
    /// How long factory failures are cached before a retry is allowed.
    pub retry_interval: Duration,
}

impl CacheConfig {
    /// Create a config with the given capacity and TTL.
    ///
    /// The retry interval for negative results defaults to a tenth of the
    /// TTL, clamped to at least one second (and never longer than the TTL).
    ///
    /// # Errors
    /// Returns `ConfigError` if `max_size` is zero or `ttl` is zero.
    pub fn new(max_size: usize, ttl: Duration) -> Result<Self, ConfigError> {
        require_positive("max_size", max_size)?;
        require_nonzero_duration("ttl", ttl)?;
        let retry_interval = (ttl / 10).max(Duration::from_secs(1)).min(ttl);
        Ok(Self {
            max_size,
            ttl,
            retry_interval,
        })
    }

    /// Override the retry interval for negative results.
    ///
    /// # Errors
    /// Returns `ConfigError` if `retry_interval` is zero.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Result<Self, ConfigError> {
        require_nonzero_duration("retry_interval", retry_interval)?;
        self.retry_interval = retry_interval;
        Ok(self)
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Number of live plus expired-but-unswept entries.
    pub size: usize,
    /// Configured capacity.
    pub max_size: usize,
    /// `size / max_size`.
    pub utilization: f64,
    /// Configured TTL for successful values.
    pub ttl: Duration,
}

struct CacheEntry<V> {
    value: Result<V, FactoryError>,
    last_access: Instant,
    expires_at: Instant,
}

type FlightSlot<V> = Option<Result<V, FactoryError>>;

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    inflight: HashMap<K, watch::Receiver<FlightSlot<V>>>,
}

enum Role<V> {
    Hit(Result<V, FactoryError>),
    Wait(watch::Receiver<FlightSlot<V>>),
    Lead(watch::Sender<FlightSlot<V>>),
}

/// Generic key/value cache with TTL expiry, LRU eviction, and single-flight
/// computation.
///
/// All entry bookkeeping lives behind one lock which is never held across an
/// await point; operations on different keys never suspend on each other.
/// Waiting on another caller's in-flight computation for the *same* key is
/// the only suspension point besides running one's own factory.
///
/// ```no_run
/// use logsluice::{AsyncCache, CacheConfig, SystemClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() {
/// let cache: AsyncCache<String, String> = AsyncCache::new(
///     CacheConfig::new(1_000, Duration::from_secs(300)).unwrap(),
///     Arc::new(SystemClock::new()),
/// );
///
/// let value = cache
///     .get_or_create("tenant-42".to_string(), || async {
///         Ok::<_, std::io::Error>("resolved".to_string())
///     })
///     .await
///     .unwrap();
/// assert_eq!(value, "resolved");
/// # }
/// ```
pub struct AsyncCache<K, V>
where
    K: Eq + Hash + Clone,
{
    state: Mutex<CacheState<K, V>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl<K, V> AsyncCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    /// Create a cache with its own metrics handle.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_metrics(config, clock, Metrics::new())
    }

    /// Create a cache that reports into a shared metrics handle.
    pub fn with_metrics(config: CacheConfig, clock: Arc<dyn Clock>, metrics: Metrics) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                inflight: HashMap::new(),
            }),
            config,
            clock,
            metrics,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().expect("cache state mutex poisoned")
    }

    /// Return the live value for `key`, never triggering computation.
    ///
    /// Negatively-cached factory errors report as absent: they only answer
    /// "don't re-run the factory yet" inside [`Self::get_or_create`].
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut state = self.lock();
        match state.entries.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                entry.last_access = now;
                match &entry.value {
                    Ok(value) => {
                        self.metrics.record_cache_hit();
                        Some(value.clone())
                    }
                    Err(_) => {
                        self.metrics.record_cache_miss();
                        None
                    }
                }
            }
            _ => {
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    /// Unconditionally insert `value` with a fresh TTL, evicting the
    /// least-recently-used entry if the cache would exceed capacity.
    pub fn set(&self, key: K, value: V) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.entries.insert(
            key,
            CacheEntry {
                value: Ok(value),
                last_access: now,
                expires_at: now + self.config.ttl,
            },
        );
        self.evict_over_capacity(&mut state);
    }

    /// Return a live entry, await an in-flight computation, or run `factory`
    /// exactly once and share its result with every concurrent caller.
    ///
    /// If `factory` fails, the error is returned to all waiters and cached
    /// negatively for the configured retry interval; after that, the next
    /// caller is allowed to retry.
    pub async fn get_or_create<F, Fut, E>(&self, key: K, factory: F) -> Result<V, FactoryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut factory = Some(factory);
        loop {
            let role = self.claim(&key);
            match role {
                Role::Hit(result) => return result,
                Role::Wait(mut rx) => {
                    loop {
                        let published = rx.borrow().clone();
                        if let Some(result) = published {
                            return result;
                        }
                        if rx.changed().await.is_err() {
                            // The leader was dropped before publishing; clear
                            // the stale marker and start over.
                            self.forget_dead_flight(&key);
                            break;
                        }
                    }
                }
                Role::Lead(tx) => {
                    let factory = factory
                        .take()
                        .expect("leadership is claimed at most once per call");
                    let guard = FlightGuard {
                        cache: self,
                        key: Some(key.clone()),
                    };
                    let result = match factory().await {
                        Ok(value) => Ok(value),
                        Err(e) => Err(FactoryError::new(e.into())),
                    };
                    self.publish(&key, result.clone());
                    guard.disarm();
                    let _ = tx.send(Some(result.clone()));
                    return result;
                }
            }
        }
    }

    /// Decide whether this caller hits, waits, or leads.
    fn claim(&self, key: &K) -> Role<V> {
        let now = self.clock.now();
        let mut state = self.lock();

        if let Some(entry) = state.entries.get_mut(key) {
            if now < entry.expires_at {
                entry.last_access = now;
                self.metrics.record_cache_hit();
                return Role::Hit(entry.value.clone());
            }
        }

        if let Some(rx) = state.inflight.get(key) {
            return Role::Wait(rx.clone());
        }

        self.metrics.record_cache_miss();
        let (tx, rx) = watch::channel(None);
        state.inflight.insert(key.clone(), rx);
        Role::Lead(tx)
    }

    /// Store the factory result and release the in-flight marker.
    fn publish(&self, key: &K, result: Result<V, FactoryError>) {
        let now = self.clock.now();
        let lifetime = if result.is_ok() {
            self.config.ttl
        } else {
            self.config.retry_interval
        };
        let mut state = self.lock();
        state.entries.insert(
            key.clone(),
            CacheEntry {
                value: result,
                last_access: now,
                expires_at: now + lifetime,
            },
        );
        state.inflight.remove(key);
        self.evict_over_capacity(&mut state);
    }

    /// Remove an in-flight marker whose sender is gone.
    fn forget_dead_flight(&self, key: &K) {
        let mut state = self.lock();
        let dead = state
            .inflight
            .get(key)
            .map(|rx| rx.has_changed().is_err())
            .unwrap_or(false);
        if dead {
            state.inflight.remove(key);
        }
    }

    /// Evict least-recently-accessed entries until within capacity. In-flight
    /// markers live outside the entry map and are never candidates.
    fn evict_over_capacity(&self, state: &mut CacheState<K, V>) {
        while state.entries.len() > self.config.max_size {
            let victim = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    state.entries.remove(&key);
                    self.metrics.record_cache_eviction();
                }
                None => break,
            }
        }
    }

    /// Remove `key`, reporting whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Remove all entries. In-flight computations are unaffected and will
    /// repopulate the cache when they complete.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Sweep out every entry whose expiry has passed, regardless of LRU
    /// position. Returns the number of removed entries.
    pub fn cleanup_expired(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| now < entry.expires_at);
        before.saturating_sub(state.entries.len())
    }

    /// Number of stored entries, including expired-but-unswept ones.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> CacheStats {
        let size = self.len();
        CacheStats {
            size,
            max_size: self.config.max_size,
            utilization: size as f64 / self.config.max_size as f64,
            ttl: self.config.ttl,
        }
    }
}

/// Removes the in-flight marker if the leader is dropped before publishing,
/// so waiters fail over to a fresh computation instead of hanging.
struct FlightGuard<'a, K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    cache: &'a AsyncCache<K, V>,
    key: Option<K>,
}

impl<K, V> FlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn disarm(mut self) {
        self.key = None;
    }
}

impl<K, V> Drop for FlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.lock().inflight.remove(&key);
        }
    }
}

#[async_trait]
impl<K, V> CleanupTarget for AsyncCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn cleanup_expired_entries(&self, now: Instant) -> usize {
        self.cleanup_expired(now)
    }

    fn utilization(&self) -> f64 {
        self.len() as f64 / self.config.max_size as f64
    }
}
