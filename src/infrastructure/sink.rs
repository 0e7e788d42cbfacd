//! Concrete sink adapters.
//!
//! Real delivery backends (HTTP ingestion APIs, files) live outside this
//! crate behind the `Sink` port. The adapters here cover the common local
//! cases: emitting batches through `tracing`, and guarding any sink with a
//! circuit breaker.

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::application::ports::{Sink, SinkError};
use crate::domain::event::Event;
use async_trait::async_trait;
use std::sync::Arc;

/// Sink that emits each batch as `tracing` events.
///
/// Events are rendered to compact JSON at `info` level under the
/// `logsluice::delivery` target, which downstream subscribers can route or
/// filter like any other tracing output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Create a new tracing sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for TracingSink {
    async fn write(&self, batch: &[Event]) -> Result<(), SinkError> {
        for event in batch {
            match serde_json::to_string(event) {
                Ok(rendered) => {
                    tracing::info!(target: "logsluice::delivery", event = %rendered)
                }
                Err(e) => return Err(Box::new(e)),
            }
        }
        Ok(())
    }
}

/// Sink adapter that routes every write through a circuit breaker.
///
/// While the circuit is open, writes fail immediately without touching the
/// wrapped sink, so the worker's bounded retries burn no time on a
/// downstream that is known to be unhealthy.
pub struct GuardedSink {
    inner: Arc<dyn Sink>,
    breaker: CircuitBreaker,
}

impl GuardedSink {
    /// Wrap `inner` with `breaker`.
    pub fn new(inner: Arc<dyn Sink>, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }

    /// The breaker guarding the wrapped sink.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl Sink for GuardedSink {
    async fn write(&self, batch: &[Event]) -> Result<(), SinkError> {
        match self.breaker.call(|| self.inner.write(batch)).await {
            Ok(()) => Ok(()),
            Err(CircuitBreakerError::Open(e)) => Err(Box::new(e)),
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }
}
