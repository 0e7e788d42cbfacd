//! Observability counters for the pipeline.
//!
//! All counters use atomic operations for thread-safe updates and reads.
//! They are collected throughout processing and can be queried at any time;
//! export formatting is left to an external metrics exporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Metrics tracking pipeline behavior.
///
/// Cloning is cheap and all clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Events accepted into the queue
    events_enqueued: AtomicU64,
    /// Events discarded because the queue was full or closed
    events_dropped: AtomicU64,
    /// Events shed probabilistically before the capacity check
    events_sampled_out: AtomicU64,
    /// Events suppressed by the throttle
    events_throttled: AtomicU64,
    /// Events suppressed as duplicates
    events_deduplicated: AtomicU64,
    /// Batches handed to the sink successfully
    batches_delivered: AtomicU64,
    /// Events contained in delivered batches
    events_delivered: AtomicU64,
    /// Individual sink attempts that failed (including retried ones)
    delivery_failures: AtomicU64,
    /// Batches dropped after exhausting retries
    batches_abandoned: AtomicU64,
    /// Cache lookups served from a live entry
    cache_hits: AtomicU64,
    /// Cache lookups that missed or found an expired entry
    cache_misses: AtomicU64,
    /// Cache entries removed by capacity eviction
    cache_evictions: AtomicU64,
    /// Tracked keys removed from processor stores by the cardinality bound
    keys_evicted: AtomicU64,
    /// Circuit breaker transitions into Open
    breaker_opened: AtomicU64,
    /// Circuit breaker transitions into Closed
    breaker_closed: AtomicU64,
    /// Completed cleanup passes
    cleanup_passes: AtomicU64,
    /// Entries removed by completed cleanup passes
    cleanup_removed: AtomicU64,
    /// Cleanup passes abandoned at their deadline
    cleanup_timeouts: AtomicU64,
    /// Summed enqueue-to-dequeue wait, in nanoseconds
    queue_wait_nanos: AtomicU64,
    /// Number of waits contributing to `queue_wait_nanos`
    queue_wait_samples: AtomicU64,
}

impl Metrics {
    /// Create a new metrics handle with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_enqueued(&self) {
        self.inner.events_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.inner.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sampled_out(&self) {
        self.inner.events_sampled_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttled(&self) {
        self.inner.events_throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deduplicated(&self) {
        self.inner.events_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_delivered(&self, events: usize) {
        self.inner.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.inner
            .events_delivered
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery_failure(&self) {
        self.inner.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_abandoned(&self) {
        self.inner.batches_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_eviction(&self) {
        self.inner.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_key_eviction(&self) {
        self.inner.keys_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_breaker_opened(&self) {
        self.inner.breaker_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_breaker_closed(&self) {
        self.inner.breaker_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cleanup_pass(&self, removed: usize) {
        self.inner.cleanup_passes.fetch_add(1, Ordering::Relaxed);
        self.inner
            .cleanup_removed
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_cleanup_timeout(&self) {
        self.inner.cleanup_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queue_wait(&self, wait: Duration) {
        let nanos = wait.as_nanos().try_into().unwrap_or(u64::MAX);
        self.inner.queue_wait_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.inner.queue_wait_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the total number of events accepted into the queue.
    pub fn events_enqueued(&self) -> u64 {
        self.inner.events_enqueued.load(Ordering::Relaxed)
    }

    /// Get the total number of events dropped at the queue.
    pub fn events_dropped(&self) -> u64 {
        self.inner.events_dropped.load(Ordering::Relaxed)
    }

    /// Get the total number of events shed by sampling.
    pub fn events_sampled_out(&self) -> u64 {
        self.inner.events_sampled_out.load(Ordering::Relaxed)
    }

    /// Get the total number of events suppressed by the throttle.
    pub fn events_throttled(&self) -> u64 {
        self.inner.events_throttled.load(Ordering::Relaxed)
    }

    /// Get the total number of events suppressed as duplicates.
    pub fn events_deduplicated(&self) -> u64 {
        self.inner.events_deduplicated.load(Ordering::Relaxed)
    }

    /// Get the total number of batches delivered to the sink.
    pub fn batches_delivered(&self) -> u64 {
        self.inner.batches_delivered.load(Ordering::Relaxed)
    }

    /// Get the total number of events delivered to the sink.
    pub fn events_delivered(&self) -> u64 {
        self.inner.events_delivered.load(Ordering::Relaxed)
    }

    /// Get the total number of failed sink attempts.
    pub fn delivery_failures(&self) -> u64 {
        self.inner.delivery_failures.load(Ordering::Relaxed)
    }

    /// Get the total number of batches abandoned after retries.
    pub fn batches_abandoned(&self) -> u64 {
        self.inner.batches_abandoned.load(Ordering::Relaxed)
    }

    /// Get the total number of cache hits.
    pub fn cache_hits(&self) -> u64 {
        self.inner.cache_hits.load(Ordering::Relaxed)
    }

    /// Get the total number of cache misses.
    pub fn cache_misses(&self) -> u64 {
        self.inner.cache_misses.load(Ordering::Relaxed)
    }

    /// Get the total number of cache capacity evictions.
    pub fn cache_evictions(&self) -> u64 {
        self.inner.cache_evictions.load(Ordering::Relaxed)
    }

    /// Get the total number of tracked keys evicted from processor stores.
    pub fn keys_evicted(&self) -> u64 {
        self.inner.keys_evicted.load(Ordering::Relaxed)
    }

    /// Get the number of circuit breaker transitions into Open.
    pub fn breaker_opened(&self) -> u64 {
        self.inner.breaker_opened.load(Ordering::Relaxed)
    }

    /// Get the number of circuit breaker transitions into Closed.
    pub fn breaker_closed(&self) -> u64 {
        self.inner.breaker_closed.load(Ordering::Relaxed)
    }

    /// Get the number of completed cleanup passes.
    pub fn cleanup_passes(&self) -> u64 {
        self.inner.cleanup_passes.load(Ordering::Relaxed)
    }

    /// Get the number of entries removed by cleanup passes.
    pub fn cleanup_removed(&self) -> u64 {
        self.inner.cleanup_removed.load(Ordering::Relaxed)
    }

    /// Get the number of cleanup passes abandoned at their deadline.
    pub fn cleanup_timeouts(&self) -> u64 {
        self.inner.cleanup_timeouts.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_enqueued: self.events_enqueued(),
            events_dropped: self.events_dropped(),
            events_sampled_out: self.events_sampled_out(),
            events_throttled: self.events_throttled(),
            events_deduplicated: self.events_deduplicated(),
            batches_delivered: self.batches_delivered(),
            events_delivered: self.events_delivered(),
            delivery_failures: self.delivery_failures(),
            batches_abandoned: self.batches_abandoned(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            cache_evictions: self.cache_evictions(),
            keys_evicted: self.keys_evicted(),
            breaker_opened: self.breaker_opened(),
            breaker_closed: self.breaker_closed(),
            cleanup_passes: self.cleanup_passes(),
            cleanup_removed: self.cleanup_removed(),
            cleanup_timeouts: self.cleanup_timeouts(),
            queue_wait_nanos: self.inner.queue_wait_nanos.load(Ordering::Relaxed),
            queue_wait_samples: self.inner.queue_wait_samples.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    ///
    /// Useful for testing or when starting a new monitoring period.
    pub fn reset(&self) {
        let inner = &self.inner;
        for counter in [
            &inner.events_enqueued,
            &inner.events_dropped,
            &inner.events_sampled_out,
            &inner.events_throttled,
            &inner.events_deduplicated,
            &inner.batches_delivered,
            &inner.events_delivered,
            &inner.delivery_failures,
            &inner.batches_abandoned,
            &inner.cache_hits,
            &inner.cache_misses,
            &inner.cache_evictions,
            &inner.keys_evicted,
            &inner.breaker_opened,
            &inner.breaker_closed,
            &inner.cleanup_passes,
            &inner.cleanup_removed,
            &inner.cleanup_timeouts,
            &inner.queue_wait_nanos,
            &inner.queue_wait_samples,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Events accepted into the queue
    pub events_enqueued: u64,
    /// Events discarded because the queue was full or closed
    pub events_dropped: u64,
    /// Events shed probabilistically before the capacity check
    pub events_sampled_out: u64,
    /// Events suppressed by the throttle
    pub events_throttled: u64,
    /// Events suppressed as duplicates
    pub events_deduplicated: u64,
    /// Batches handed to the sink successfully
    pub batches_delivered: u64,
    /// Events contained in delivered batches
    pub events_delivered: u64,
    /// Individual sink attempts that failed
    pub delivery_failures: u64,
    /// Batches dropped after exhausting retries
    pub batches_abandoned: u64,
    /// Cache lookups served from a live entry
    pub cache_hits: u64,
    /// Cache lookups that missed
    pub cache_misses: u64,
    /// Cache entries removed by capacity eviction
    pub cache_evictions: u64,
    /// Tracked keys removed by the cardinality bound
    pub keys_evicted: u64,
    /// Circuit breaker transitions into Open
    pub breaker_opened: u64,
    /// Circuit breaker transitions into Closed
    pub breaker_closed: u64,
    /// Completed cleanup passes
    pub cleanup_passes: u64,
    /// Entries removed by completed cleanup passes
    pub cleanup_removed: u64,
    /// Cleanup passes abandoned at their deadline
    pub cleanup_timeouts: u64,
    /// Summed enqueue-to-dequeue wait, in nanoseconds
    pub queue_wait_nanos: u64,
    /// Number of waits contributing to the sum
    pub queue_wait_samples: u64,
}

impl MetricsSnapshot {
    /// Total events offered to the queue (accepted + dropped + sampled out).
    pub fn total_offered(&self) -> u64 {
        self.events_enqueued
            .saturating_add(self.events_dropped)
            .saturating_add(self.events_sampled_out)
    }

    /// Ratio of dropped events to total offered, in `[0.0, 1.0]`.
    pub fn drop_rate(&self) -> f64 {
        let total = self.total_offered();
        if total == 0 {
            0.0
        } else {
            self.events_dropped as f64 / total as f64
        }
    }

    /// Ratio of cache hits to total lookups, in `[0.0, 1.0]`.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits.saturating_add(self.cache_misses);
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Mean enqueue-to-dequeue wait, if any events were dequeued.
    pub fn mean_queue_wait(&self) -> Option<Duration> {
        if self.queue_wait_samples == 0 {
            None
        } else {
            Some(Duration::from_nanos(
                self.queue_wait_nanos / self.queue_wait_samples,
            ))
        }
    }
}
