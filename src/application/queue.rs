//! Bounded, backpressure-aware event queue.
//!
//! The queue decouples producers from delivery. It is strictly FIFO for
//! accepted items and never grows past its capacity; what happens at
//! capacity is governed by the overflow strategy.

use crate::application::metrics::Metrics;
use crate::application::ports::Clock;
use crate::config::{require_positive, require_probability, ConfigError};
use crate::domain::event::Event;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Policy governing queue behavior when at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowStrategy {
    /// Discard the new event without suspending the caller. The default.
    #[default]
    Drop,
    /// Suspend the caller until space frees or the queue shuts down.
    Block,
    /// Probabilistically discard the event *before* the capacity check, then
    /// behave like `Drop`.
    Sample,
}

/// Outcome of an enqueue attempt.
///
/// Queue-full and queue-closed are expected, frequent conditions under
/// `Drop`/`Sample`, so they are values rather than errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The event was accepted into the queue.
    Accepted,
    /// The event was discarded: the queue was full or shutting down.
    Dropped,
    /// The event was shed by the sampling draw before the capacity check.
    Sampled,
}

impl EnqueueOutcome {
    /// Whether the event made it into the queue.
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted)
    }
}

/// Configuration for a [`BoundedEventQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of buffered events.
    pub capacity: usize,
    /// Behavior at capacity.
    pub overflow_strategy: OverflowStrategy,
    /// Probability of keeping an event under [`OverflowStrategy::Sample`].
    /// Ignored by other strategies.
    pub sampling_rate: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            overflow_strategy: OverflowStrategy::Drop,
            sampling_rate: 1.0,
        }
    }
}

impl QueueConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if `capacity` is zero or `sampling_rate` is
    /// outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("capacity", self.capacity)?;
        require_probability("sampling_rate", self.sampling_rate)?;
        Ok(())
    }
}

/// An event plus the instant it entered the queue (for wait metrics only;
/// ordering is FIFO regardless).
#[derive(Debug)]
pub struct QueueItem {
    event: Event,
    enqueued_at: Instant,
}

impl QueueItem {
    /// The buffered event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// When the event entered the queue.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Consume the item, yielding the event.
    pub fn into_event(self) -> Event {
        self.event
    }
}

struct QueueInner {
    items: Mutex<VecDeque<QueueItem>>,
    config: QueueConfig,
    space: Notify,
    data: Notify,
    closed: AtomicBool,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

/// Bounded FIFO queue with configurable overflow behavior.
///
/// Cloning is cheap; all clones share the same buffer.
#[derive(Clone)]
pub struct BoundedEventQueue {
    inner: Arc<QueueInner>,
}

impl BoundedEventQueue {
    /// Create a queue.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid configuration.
    pub fn new(
        config: QueueConfig,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::with_capacity(config.capacity.min(1024))),
                config,
                space: Notify::new(),
                data: Notify::new(),
                closed: AtomicBool::new(false),
                clock,
                metrics,
            }),
        })
    }

    /// Offer an event to the queue.
    ///
    /// Under `Drop` and `Sample` this never suspends. Under `Block` it
    /// suspends until space is available or the queue is closed; a closed
    /// queue discards the event and reports [`EnqueueOutcome::Dropped`].
    pub async fn enqueue(&self, event: Event) -> EnqueueOutcome {
        let inner = &self.inner;

        if inner.config.overflow_strategy == OverflowStrategy::Sample
            && rand::random::<f64>() >= inner.config.sampling_rate
        {
            inner.metrics.record_sampled_out();
            return EnqueueOutcome::Sampled;
        }

        if inner.config.overflow_strategy == OverflowStrategy::Block {
            return self.enqueue_blocking(event).await;
        }

        if inner.closed.load(Ordering::Acquire) {
            inner.metrics.record_dropped();
            return EnqueueOutcome::Dropped;
        }

        let mut items = inner.items.lock().expect("queue mutex poisoned");
        if items.len() < inner.config.capacity {
            items.push_back(QueueItem {
                event,
                enqueued_at: inner.clock.now(),
            });
            drop(items);
            inner.metrics.record_enqueued();
            inner.data.notify_one();
            EnqueueOutcome::Accepted
        } else {
            drop(items);
            inner.metrics.record_dropped();
            EnqueueOutcome::Dropped
        }
    }

    async fn enqueue_blocking(&self, event: Event) -> EnqueueOutcome {
        let inner = &self.inner;
        loop {
            // Register interest before checking state so a wakeup between the
            // check and the await is not lost.
            let notified = inner.space.notified();

            {
                if inner.closed.load(Ordering::Acquire) {
                    inner.metrics.record_dropped();
                    return EnqueueOutcome::Dropped;
                }
                let mut items = inner.items.lock().expect("queue mutex poisoned");
                if items.len() < inner.config.capacity {
                    items.push_back(QueueItem {
                        event,
                        enqueued_at: inner.clock.now(),
                    });
                    drop(items);
                    inner.metrics.record_enqueued();
                    inner.data.notify_one();
                    return EnqueueOutcome::Accepted;
                }
            }

            notified.await;
        }
    }

    /// Collect up to `max` items, waiting up to `timeout` for the first item
    /// to become available. Returns whatever is buffered when either the
    /// batch fills or the deadline passes; returns immediately once the queue
    /// is closed and drained.
    pub async fn next_batch(&self, max: usize, timeout: Duration) -> Vec<QueueItem> {
        let inner = &self.inner;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut batch = Vec::new();

        loop {
            let notified = inner.data.notified();

            {
                let mut items = inner.items.lock().expect("queue mutex poisoned");
                while batch.len() < max {
                    match items.pop_front() {
                        Some(item) => {
                            inner
                                .metrics
                                .record_queue_wait(inner.clock.now().saturating_duration_since(
                                    item.enqueued_at,
                                ));
                            batch.push(item);
                            inner.space.notify_one();
                        }
                        None => break,
                    }
                }
            }

            if batch.len() >= max || inner.closed.load(Ordering::Acquire) {
                return batch;
            }
            // A partial batch ships at the deadline rather than waiting
            // indefinitely for stragglers.
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return batch;
            }
        }
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.inner.items.lock().expect("queue mutex poisoned").len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Stop accepting events and wake all blocked producers and consumers.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.space.notify_waiters();
        self.inner.data.notify_waiters();
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
