//! Bounded concurrent storage for per-key processor state.
//!
//! Provides sharded storage for tracking throttle windows and dedup
//! signatures, with a hard cardinality bound enforced through eviction of the
//! least-recently-touched key.

use crate::application::metrics::Metrics;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
struct Tracked<V> {
    value: V,
    last_touch: Instant,
}

/// Thread-safe keyed storage backed by DashMap, bounded by `max_keys`.
///
/// DashMap provides lock-free reads and fine-grained locking for writes,
/// making it suitable for high-throughput event processing. Accessors for the
/// same key are serialized on the key's shard lock, which is what makes
/// per-key decisions exact under concurrency.
///
/// When a brand-new key would exceed `max_keys`, the least-recently-touched
/// key is evicted first. Evicting a still-active key is an accepted trade-off:
/// it can reset that key's state, but it guarantees bounded memory even when
/// callers mistakenly use high-cardinality values (request IDs, UUIDs) as
/// tracking keys.
#[derive(Debug)]
pub struct KeyedStore<K, V>
where
    K: Eq + Hash + Clone,
{
    map: DashMap<K, Tracked<V>>,
    max_keys: usize,
    // Serializes admission of new keys so the bound holds exactly. Existing
    // keys never take this lock.
    admission: Mutex<()>,
    metrics: Metrics,
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a store bounded to `max_keys` tracked keys.
    pub fn new(max_keys: usize, metrics: Metrics) -> Self {
        Self {
            map: DashMap::new(),
            max_keys,
            admission: Mutex::new(()),
            metrics,
        }
    }

    /// Access an entry with mutable access, creating it if necessary.
    ///
    /// The accessor receives the value and a flag indicating whether the
    /// entry was created by this call. The entry's last-touch time is
    /// refreshed either way. While the accessor runs it holds the key's shard
    /// lock, so it must not reenter this store.
    pub fn with_entry_mut<R>(
        &self,
        key: K,
        now: Instant,
        init: impl FnOnce() -> V,
        accessor: impl FnOnce(&mut V, bool) -> R,
    ) -> R {
        if let Some(mut entry) = self.map.get_mut(&key) {
            entry.last_touch = now;
            return accessor(&mut entry.value, false);
        }

        let guard = self
            .admission
            .lock()
            .expect("keyed store admission mutex poisoned");

        // The key may have been admitted while we waited for the lock.
        if let Some(mut entry) = self.map.get_mut(&key) {
            entry.last_touch = now;
            drop(guard);
            return accessor(&mut entry.value, false);
        }

        while self.map.len() >= self.max_keys {
            if !self.evict_least_recently_touched() {
                break;
            }
        }

        let mut entry = self.map.entry(key).or_insert_with(|| Tracked {
            value: init(),
            last_touch: now,
        });
        let result = accessor(&mut entry.value, true);
        drop(entry);
        drop(guard);
        result
    }

    /// Evict the key with the oldest last-touch time. Returns false when the
    /// map is empty.
    fn evict_least_recently_touched(&self) -> bool {
        let victim = self
            .map
            .iter()
            .min_by_key(|entry| entry.value().last_touch)
            .map(|entry| entry.key().clone());

        match victim {
            Some(key) => {
                self.map.remove(&key);
                self.metrics.record_key_eviction();
                tracing::debug!("evicted least-recently-touched key from bounded store");
                true
            }
            None => false,
        }
    }

    /// Remove entries for which the predicate returns false. Returns how many
    /// entries were removed.
    pub fn retain(&self, f: impl FnMut(&K, &mut V) -> bool) -> usize {
        let before = self.map.len();
        let mut f = f;
        self.map.retain(|k, tracked| f(k, &mut tracked.value));
        before.saturating_sub(self.map.len())
    }

    /// Check whether a key is currently tracked.
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Maximum number of tracked keys.
    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Current fill ratio in `[0.0, 1.0]`.
    pub fn utilization(&self) -> f64 {
        self.map.len() as f64 / self.max_keys as f64
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.map.clear();
    }
}
