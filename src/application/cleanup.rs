//! Background cleanup scheduling.
//!
//! Amortizes memory reclamation for the cache and the processor stores
//! without blocking the producer path. Passes are mutually exclusive, gated
//! on an interval or a utilization threshold, and bounded by a hard deadline:
//! a pass that overruns is abandoned without being marked done, so the next
//! cycle retries it.

use crate::application::metrics::Metrics;
use crate::application::ports::{CleanupTarget, Clock};
use crate::config::{require_nonzero_duration, ConfigError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Configuration for a [`CleanupManager`].
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Minimum time between interval-triggered passes.
    pub cleanup_interval: Duration,
    /// Target utilization at or above which a pass is triggered regardless
    /// of the interval.
    pub threshold_ratio: f64,
    /// Hard deadline for a single pass.
    pub max_duration: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60),
            threshold_ratio: 0.8,
            max_duration: Duration::from_secs(5),
        }
    }
}

impl CleanupConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if a duration is zero or `threshold_ratio` is
    /// outside `(0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero_duration("cleanup_interval", self.cleanup_interval)?;
        require_nonzero_duration("max_duration", self.max_duration)?;
        if !(self.threshold_ratio > 0.0 && self.threshold_ratio <= 1.0) {
            return Err(ConfigError::OutOfRange {
                param: "threshold_ratio",
                value: self.threshold_ratio,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(())
    }
}

struct ManagerInner {
    target: Arc<dyn CleanupTarget>,
    config: CleanupConfig,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    last_cleanup: Mutex<Option<Instant>>,
    running: AtomicBool,
}

impl ManagerInner {
    /// Run one pass under the deadline. The pass future is dropped at the
    /// deadline, which cancels it at its next suspension point;
    /// `last_cleanup` only advances on completion.
    async fn run_pass(&self, now: Instant) {
        match tokio::time::timeout(
            self.config.max_duration,
            self.target.cleanup_expired_entries(now),
        )
        .await
        {
            Ok(removed) => {
                *self
                    .last_cleanup
                    .lock()
                    .expect("cleanup manager mutex poisoned") = Some(now);
                self.metrics.record_cleanup_pass(removed);
                tracing::debug!(removed, "cleanup pass completed");
            }
            Err(_) => {
                self.metrics.record_cleanup_timeout();
                tracing::warn!(
                    max_duration_ms = self.config.max_duration.as_millis() as u64,
                    "cleanup pass abandoned at deadline, will retry next cycle"
                );
            }
        }
        self.running.store(false, Ordering::Release);
    }
}

/// Schedules cleanup passes against a [`CleanupTarget`].
///
/// Cloning is cheap; all clones share the same scheduling state, so mutual
/// exclusion holds across clones.
#[derive(Clone)]
pub struct CleanupManager {
    inner: Arc<ManagerInner>,
}

impl CleanupManager {
    /// Create a manager for `target`.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid configuration.
    pub fn new(
        target: Arc<dyn CleanupTarget>,
        config: CleanupConfig,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                target,
                config,
                clock,
                metrics,
                last_cleanup: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Whether a pass is executing right now.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// When the last completed pass ran, if any.
    pub fn last_cleanup(&self) -> Option<Instant> {
        *self
            .inner
            .last_cleanup
            .lock()
            .expect("cleanup manager mutex poisoned")
    }

    fn due(&self, now: Instant) -> bool {
        let interval_due = self
            .last_cleanup()
            .map_or(true, |last| now.saturating_duration_since(last) >= self.inner.config.cleanup_interval);
        interval_due || self.inner.target.utilization() >= self.inner.config.threshold_ratio
    }

    /// Trigger a background pass if one is due (or `force` is set) and none
    /// is already running. Returns whether a pass was scheduled.
    pub fn schedule_cleanup(&self, now: Instant, force: bool) -> bool {
        if !force && !self.due(now) {
            return false;
        }
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_pass(now).await;
        });
        true
    }

    /// Run a pass inline, bypassing the interval/utilization gate but still
    /// subject to the deadline and to mutual exclusion.
    ///
    /// Returns the removed-entry count, or `None` when a pass was already
    /// running or the pass was abandoned at the deadline.
    pub async fn force_cleanup(&self, now: Option<Instant>) -> Option<usize> {
        let now = now.unwrap_or_else(|| self.inner.clock.now());
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let inner = &self.inner;
        let result = tokio::time::timeout(
            inner.config.max_duration,
            inner.target.cleanup_expired_entries(now),
        )
        .await;

        let outcome = match result {
            Ok(removed) => {
                *inner
                    .last_cleanup
                    .lock()
                    .expect("cleanup manager mutex poisoned") = Some(now);
                inner.metrics.record_cleanup_pass(removed);
                Some(removed)
            }
            Err(_) => {
                inner.metrics.record_cleanup_timeout();
                None
            }
        };
        inner.running.store(false, Ordering::Release);
        outcome
    }

    /// Spawn a ticker that calls [`Self::schedule_cleanup`] once per
    /// interval. The returned handle owns the task; dropping it detaches the
    /// ticker, shutting it down stops it deterministically.
    pub fn spawn_periodic(&self) -> CleanupHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.inner.config.cleanup_interval);
            // The first tick fires immediately; skip it so a fresh pipeline
            // does not run a pointless pass at startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = manager.inner.clock.now();
                        manager.schedule_cleanup(now, false);
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        CleanupHandle { shutdown_tx, task }
    }
}

/// Error returned when the periodic cleanup task fails to shut down cleanly.
#[derive(Debug)]
pub struct ShutdownError;

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleanup ticker task panicked during shutdown")
    }
}

impl std::error::Error for ShutdownError {}

/// Handle owning a periodic cleanup ticker.
pub struct CleanupHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupHandle {
    /// Stop the ticker and wait for it to exit.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the ticker task panicked.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        let _ = self.shutdown_tx.send(true);
        self.task.await.map_err(|_| ShutdownError)
    }
}
