//! Circuit breaker for downstream dependency isolation.
//!
//! Guards calls against a misbehaving downstream dependency. After a run of
//! consecutive failures the circuit opens and calls fail fast without
//! touching the dependency; once the recovery timeout elapses a single trial
//! call probes whether the dependency has recovered.

use crate::application::metrics::Metrics;
use crate::config::{require_nonzero_duration, ConfigError};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed = 0,
    /// Calls fail fast without invoking the dependency.
    Open = 1,
    /// A single trial call is probing recovery.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if `failure_threshold` is zero or
    /// `recovery_timeout` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::NonPositive {
                param: "failure_threshold",
            });
        }
        require_nonzero_duration("recovery_timeout", self.recovery_timeout)?;
        Ok(())
    }
}

/// Error returned when a call is rejected because the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError {
    /// How long the circuit has been open.
    pub open_for: Duration,
    /// Consecutive failures recorded when the call was rejected.
    pub failure_count: u32,
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "circuit is open (failures: {}, open for: {:?})",
            self.failure_count, self.open_for
        )
    }
}

impl std::error::Error for CircuitOpenError {}

/// Error returned by [`CircuitBreaker::call`].
///
/// The breaker augments failures, it never swallows them: the dependency's
/// own error is always re-raised through the `Inner` variant.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open; the guarded call was not invoked.
    Open(CircuitOpenError),
    /// The guarded call ran and failed with this error.
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether this is the fail-fast open rejection.
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open(_))
    }

    /// Extract the dependency's own error, if the call ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            CircuitBreakerError::Open(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerError::Open(e) => write!(f, "{}", e),
            CircuitBreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitBreakerError::Open(e) => Some(e),
            CircuitBreakerError::Inner(e) => Some(e),
        }
    }
}

/// Failure-isolation state machine guarding a downstream dependency.
///
/// State lives in atomics so the hot path never takes a lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at_nanos: AtomicU64,
    config: CircuitBreakerConfig,
    /// Reference epoch for timestamp arithmetic.
    epoch: Instant,
    metrics: Metrics,
}

impl CircuitBreaker {
    /// Create a breaker with default configuration.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
            .expect("default circuit breaker configuration is always valid")
    }

    /// Create a breaker with custom configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at_nanos: AtomicU64::new(0),
            config,
            epoch: Instant::now(),
            metrics: Metrics::new(),
        })
    }

    /// Report state transitions into a shared metrics handle instead of a
    /// private one.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Get the number of consecutive failures.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Invoke `f` through the breaker.
    ///
    /// While the circuit is open and the recovery timeout has not elapsed,
    /// returns [`CircuitBreakerError::Open`] without invoking `f`. Once the
    /// timeout elapses, exactly one caller wins the transition to half-open
    /// and runs a trial call; its outcome decides between closing the circuit
    /// and re-opening it with a restarted recovery timer.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire().map_err(CircuitBreakerError::Open)?;

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Decide whether a call may proceed right now.
    fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let open_for = self.open_duration();
                if open_for >= self.config.recovery_timeout {
                    // The compare-exchange elects exactly one trial caller.
                    let won = self
                        .state
                        .compare_exchange(
                            CircuitState::Open as u8,
                            CircuitState::HalfOpen as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok();
                    if won {
                        Ok(())
                    } else {
                        Err(self.open_error())
                    }
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => Err(self.open_error()),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                self.consecutive_failures.store(0, Ordering::Release);
                self.state
                    .store(CircuitState::Closed as u8, Ordering::Release);
                self.metrics.record_breaker_closed();
                tracing::info!("circuit closed after successful trial call");
            }
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match self.state() {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    self.mark_opened();
                    self.state
                        .store(CircuitState::Open as u8, Ordering::Release);
                    self.metrics.record_breaker_opened();
                    tracing::warn!(failures, "circuit opened");
                }
            }
            CircuitState::HalfOpen => {
                // Trial failed: restart the recovery timer.
                self.mark_opened();
                self.state
                    .store(CircuitState::Open as u8, Ordering::Release);
                self.metrics.record_breaker_opened();
                tracing::warn!(failures, "trial call failed, circuit re-opened");
            }
            CircuitState::Open => {
                self.mark_opened();
            }
        }
    }

    /// Reset to the initial closed state, clearing all counters.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_nanos.store(0, Ordering::Release);
    }

    fn mark_opened(&self) {
        let nanos = Instant::now()
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX);
        self.opened_at_nanos.store(nanos, Ordering::Release);
    }

    fn open_duration(&self) -> Duration {
        let opened_at = self.epoch
            + Duration::from_nanos(self.opened_at_nanos.load(Ordering::Acquire));
        Instant::now().saturating_duration_since(opened_at)
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            open_for: self.open_duration(),
            failure_count: self.failure_count(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
