//! Signature-window deduplicator.
//!
//! Suppresses events whose content signature was already seen within the
//! configured window. A suppressed duplicate does not refresh the original
//! sighting, so a steady duplicate stream is allowed through again exactly
//! one window after the last *emitted* occurrence.

use crate::application::metrics::Metrics;
use crate::application::ports::{CleanupTarget, Clock};
use crate::config::{require_nonzero_duration, require_positive, ConfigError};
use crate::domain::event::Event;
use crate::domain::signature::{EventSignature, HashAlgorithm};
use crate::infrastructure::storage::KeyedStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for a [`Deduplicator`].
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Event fields hashed into the signature. Empty means every field.
    pub fields: Vec<String>,
    /// How long a signature suppresses repeats.
    pub window: Duration,
    /// Hard cap on distinct tracked signatures.
    pub max_tracked_keys: usize,
    /// Hash algorithm for signatures.
    pub hash_algorithm: HashAlgorithm,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            window: Duration::from_secs(60),
            max_tracked_keys: 10_000,
            hash_algorithm: HashAlgorithm::Fast,
        }
    }
}

impl DedupConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if `window` or `max_tracked_keys` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero_duration("window", self.window)?;
        require_positive("max_tracked_keys", self.max_tracked_keys)?;
        Ok(())
    }
}

/// Suppresses repeated events within a sliding window.
///
/// Tracked signatures are bounded by `max_tracked_keys` with
/// least-recently-touched eviction, the same treatment as the throttle's key
/// map.
pub struct Deduplicator {
    store: KeyedStore<EventSignature, Instant>,
    config: DedupConfig,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl Deduplicator {
    /// Create a deduplicator.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid configuration.
    pub fn new(
        config: DedupConfig,
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

    /// Pass the event through, or suppress it as a duplicate.
    ///
    /// An event is a duplicate if and only if its signature was last emitted
    /// within the window.
    pub fn process(&self, event: Event) -> Option<Event> {
        let now = self.clock.now();
        let signature =
            EventSignature::of_event(&event, &self.config.fields, self.config.hash_algorithm);

        let window = self.config.window;
        let fresh = self.store.with_entry_mut(
            signature,
            now,
            || now,
            |last_emitted, created| {
                if created {
                    true
                } else if now.saturating_duration_since(*last_emitted) < window {
                    false
                } else {
                    *last_emitted = now;
                    true
                }
            },
        );

        if fresh {
            Some(event)
        } else {
            self.metrics.record_deduplicated();
            None
        }
    }

    /// Number of signatures currently tracked.
    pub fn tracked_signatures(&self) -> usize {
        self.store.len()
    }
}

#[async_trait]
impl CleanupTarget for Deduplicator {
    async fn cleanup_expired_entries(&self, now: Instant) -> usize {
        let window = self.config.window;
        self.store
            .retain(|_, last_emitted| now.saturating_duration_since(*last_emitted) < window)
    }

    fn utilization(&self) -> f64 {
        self.store.utilization()
    }
}
