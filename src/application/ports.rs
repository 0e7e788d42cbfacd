//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::event::Event;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Instant;

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time without
/// depending on system clock implementation details. Infrastructure provides
/// concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Error type produced by sinks. The pipeline never inspects sink errors
/// beyond logging and counting them.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Port for downstream batch delivery.
///
/// A sink receives batches of events from the delivery worker. It may fail;
/// the worker retries a bounded number of times and then drops the batch.
/// Network and file details live entirely behind this trait.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver a batch of events.
    async fn write(&self, batch: &[Event]) -> Result<(), SinkError>;
}

/// Port for structures that accumulate expirable per-key state.
///
/// The cleanup manager drives implementations of this trait to reclaim
/// memory off the hot path. Implementations must tolerate concurrent reads
/// and writes while a sweep runs.
#[async_trait]
pub trait CleanupTarget: Send + Sync {
    /// Remove entries that are expired as of `now`. Returns how many entries
    /// were removed.
    async fn cleanup_expired_entries(&self, now: Instant) -> usize;

    /// Current fill ratio in `[0.0, 1.0]` relative to the structure's
    /// configured capacity. Used for threshold-triggered cleanup.
    fn utilization(&self) -> f64;
}
