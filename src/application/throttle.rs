//! Per-key sliding-window throttle.
//!
//! The throttle suppresses events once a key exceeds its rate for the
//! configured window. Decisions for the same key are serialized on the
//! store's shard lock, so two concurrent callers can never both be told
//! "under the limit" when that would jointly exceed `max_rate`.

use crate::application::metrics::Metrics;
use crate::application::ports::{CleanupTarget, Clock};
use crate::config::{
    require_nonzero_duration, require_positive, require_probability, ConfigError,
};
use crate::domain::event::Event;
use crate::domain::window::SlidingWindow;
use crate::infrastructure::storage::KeyedStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bucket shared by all events whose key field is absent.
const UNKEYED: &str = "(unkeyed)";

/// What to do with events that land at or over the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitStrategy {
    /// Suppress the event. The default.
    #[default]
    Drop,
    /// Pass the event with the configured sample rate, suppress otherwise.
    Sample,
}

/// Configuration for a [`Throttle`].
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Event field whose value buckets events for rate limiting.
    pub key_field: String,
    /// Events allowed per key per window.
    pub max_rate: usize,
    /// Length of the sliding window.
    pub window: Duration,
    /// Hard cap on distinct tracked keys.
    pub max_tracked_keys: usize,
    /// Behavior at the limit.
    pub strategy: LimitStrategy,
    /// Pass probability under [`LimitStrategy::Sample`]. Ignored by `Drop`.
    pub sample_rate: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            key_field: "source".to_string(),
            max_rate: 100,
            window: Duration::from_secs(60),
            max_tracked_keys: 10_000,
            strategy: LimitStrategy::Drop,
            sample_rate: 0.1,
        }
    }
}

impl ThrottleConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` on an empty key field, a zero rate, window, or
    /// key bound, or an out-of-range sample rate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_field.is_empty() {
            return Err(ConfigError::Empty { param: "key_field" });
        }
        require_positive("max_rate", self.max_rate)?;
        require_nonzero_duration("window", self.window)?;
        require_positive("max_tracked_keys", self.max_tracked_keys)?;
        require_probability("sample_rate", self.sample_rate)?;
        Ok(())
    }
}

/// Sliding-window rate limiter over a bounded per-key store.
///
/// The per-key map is itself bounded: when a brand-new key would exceed
/// `max_tracked_keys`, the least-recently-touched key is evicted. An evicted
/// key that reappears starts with a fresh window; this is the documented
/// price of keeping memory bounded under high-cardinality keys (e.g.
/// per-request IDs used by mistake as the throttle key).
pub struct Throttle {
    store: KeyedStore<String, SlidingWindow>,
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl Throttle {
    /// Create a throttle.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid configuration.
    pub fn new(
        config: ThrottleConfig,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store: KeyedStore::new(config.max_tracked_keys, metrics.clone()),
            config,
            clock,
            metrics,
        })
    }

    /// Pass the event through, or suppress it.
    ///
    /// Returns the event unchanged when its key is under the limit, `None`
    /// when it is suppressed. Timestamps older than the window are purged
    /// lazily while the key's shard lock is held.
    pub fn process(&self, event: Event) -> Option<Event> {
        let now = self.clock.now();
        let key = event
            .field_as_string(&self.config.key_field)
            .unwrap_or_else(|| UNKEYED.to_string());

        let window = self.config.window;
        let max_rate = self.config.max_rate;
        let admitted = self.store.with_entry_mut(
            key,
            now,
            || SlidingWindow::new(window),
            |window, _| window.try_admit(now, max_rate),
        );

        if admitted {
            return Some(event);
        }

        match self.config.strategy {
            LimitStrategy::Drop => {
                self.metrics.record_throttled();
                None
            }
            LimitStrategy::Sample => {
                if rand::random::<f64>() < self.config.sample_rate {
                    Some(event)
                } else {
                    self.metrics.record_throttled();
                    None
                }
            }
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

#[async_trait]
impl CleanupTarget for Throttle {
    /// Drop keys whose every timestamp has left the window, so idle keys do
    /// not linger until their next access.
    async fn cleanup_expired_entries(&self, now: Instant) -> usize {
        self.store.retain(|_, window| {
            window.purge(now);
            !window.is_empty()
        })
    }

    fn utilization(&self) -> f64 {
        self.store.utilization()
    }
}
