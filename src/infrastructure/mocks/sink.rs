//! Mock sink for testing.

use crate::application::ports::{Sink, SinkError};
use crate::domain::event::Event;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock sink that records delivered batches.
///
/// Failure injection covers the worker's retry paths: a sink built with
/// [`MockSink::failing_times`] rejects that many write attempts before
/// accepting, and [`MockSink::with_delay`] stalls each write to exercise
/// shutdown deadlines.
///
/// Clones share the same recorded state.
#[derive(Debug, Clone, Default)]
pub struct MockSink {
    inner: Arc<MockSinkInner>,
}

#[derive(Debug, Default)]
struct MockSinkInner {
    batches: Mutex<Vec<Vec<Event>>>,
    remaining_failures: AtomicUsize,
    attempts: AtomicUsize,
    delay: Mutex<Duration>,
}

impl MockSink {
    /// Create a sink that accepts every write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that fails the first `n` write attempts.
    pub fn failing_times(n: usize) -> Self {
        let sink = Self::default();
        sink.inner.remaining_failures.store(n, Ordering::SeqCst);
        sink
    }

    /// Create a sink that sleeps for `delay` on every write.
    pub fn with_delay(delay: Duration) -> Self {
        let sink = Self::default();
        *sink.inner.delay.lock().expect("mock sink mutex poisoned") = delay;
        sink
    }

    /// All recorded batches, in delivery order.
    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.inner
            .batches
            .lock()
            .expect("mock sink mutex poisoned")
            .clone()
    }

    /// Total number of events across all delivered batches.
    pub fn delivered_events(&self) -> usize {
        self.inner
            .batches
            .lock()
            .expect("mock sink mutex poisoned")
            .iter()
            .map(|batch| batch.len())
            .sum()
    }

    /// Total write attempts, including failed ones.
    pub fn write_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MockSink {
    async fn write(&self, batch: &[Event]) -> Result<(), SinkError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.inner.delay.lock().expect("mock sink mutex poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .inner
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failing {
            return Err("injected sink failure".into());
        }

        self.inner
            .batches
            .lock()
            .expect("mock sink mutex poisoned")
            .push(batch.to_vec());
        Ok(())
    }
}
