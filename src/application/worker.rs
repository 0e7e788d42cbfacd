//! Batch delivery worker.
//!
//! The worker consumes the bounded queue in batches and hands them to the
//! configured sink. Sink failures are retried a bounded number of times and
//! then the batch is dropped with a recorded failure count; delivery problems
//! never propagate back to producers, who have long since returned from
//! `enqueue`.

use crate::application::metrics::Metrics;
use crate::application::ports::Sink;
use crate::application::queue::BoundedEventQueue;
use crate::config::{require_nonzero_duration, require_positive, ConfigError};
use crate::domain::event::Event;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Lifecycle states of the delivery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed but not consuming.
    NotStarted = 0,
    /// Consume loop active.
    Running = 1,
    /// Shutting down: the queue no longer accepts events and buffered
    /// batches are being flushed.
    Draining = 2,
    /// Consume loop exited.
    Stopped = 3,
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => WorkerState::NotStarted,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

/// Configuration for a [`DeliveryWorker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum events per delivered batch.
    pub batch_size: usize,
    /// Longest a partial batch waits before shipping.
    pub batch_timeout: Duration,
    /// Retries after a failed delivery before the batch is dropped.
    pub max_retries: usize,
    /// Delay between delivery attempts.
    pub retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_millis(500),
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
        }
    }
}

impl WorkerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if `batch_size` is zero or `batch_timeout` is
    /// zero. `max_retries` of zero is valid (no retries).
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("batch_size", self.batch_size)?;
        require_nonzero_duration("batch_timeout", self.batch_timeout)?;
        Ok(())
    }
}

/// Consumes the queue and delivers batches to a sink.
pub struct DeliveryWorker {
    queue: BoundedEventQueue,
    sink: Arc<dyn Sink>,
    config: WorkerConfig,
    state: Arc<AtomicU8>,
    metrics: Metrics,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryWorker {
    /// Create a worker.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid configuration.
    pub fn new(
        queue: BoundedEventQueue,
        sink: Arc<dyn Sink>,
        config: WorkerConfig,
        metrics: Metrics,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            queue,
            sink,
            config,
            state: Arc::new(AtomicU8::new(WorkerState::NotStarted as u8)),
            metrics,
            handle: Mutex::new(None),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    /// Start the consume loop. Returns false if the worker was already
    /// started.
    pub fn start(&self) -> bool {
        if self
            .state
            .compare_exchange(
                WorkerState::NotStarted as u8,
                WorkerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        let loop_task = ConsumeLoop {
            queue: self.queue.clone(),
            sink: Arc::clone(&self.sink),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            metrics: self.metrics.clone(),
        };
        let handle = tokio::spawn(loop_task.run());
        *self.handle.lock().expect("worker handle mutex poisoned") = Some(handle);
        true
    }

    /// Stop the worker: close the queue, flush what is buffered, and wait up
    /// to `timeout` for the consume loop to exit. Returns true for a clean
    /// drain, false if the deadline forced an abort.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let _ = self.state.compare_exchange(
            WorkerState::Running as u8,
            WorkerState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.queue.close();

        let handle = self
            .handle
            .lock()
            .expect("worker handle mutex poisoned")
            .take();

        let clean = match handle {
            Some(handle) => {
                let abort = handle.abort_handle();
                match tokio::time::timeout(timeout, handle).await {
                    Ok(_) => true,
                    Err(_) => {
                        abort.abort();
                        false
                    }
                }
            }
            None => true,
        };

        self.state
            .store(WorkerState::Stopped as u8, Ordering::Release);
        clean
    }
}

struct ConsumeLoop {
    queue: BoundedEventQueue,
    sink: Arc<dyn Sink>,
    config: WorkerConfig,
    state: Arc<AtomicU8>,
    metrics: Metrics,
}

impl ConsumeLoop {
    async fn run(self) {
        loop {
            let batch = self
                .queue
                .next_batch(self.config.batch_size, self.config.batch_timeout)
                .await;

            if batch.is_empty() {
                let draining =
                    WorkerState::from(self.state.load(Ordering::Acquire)) != WorkerState::Running;
                if (draining || self.queue.is_closed()) && self.queue.is_empty() {
                    break;
                }
                continue;
            }

            let events: Vec<Event> = batch.into_iter().map(|item| item.into_event()).collect();
            self.deliver(events).await;
        }

        self.state
            .store(WorkerState::Stopped as u8, Ordering::Release);
    }

    /// Deliver one batch, retrying on failure. An exhausted batch is dropped
    /// rather than re-queued so that a dead sink cannot grow memory without
    /// bound.
    async fn deliver(&self, events: Vec<Event>) {
        let attempts = self.config.max_retries + 1;
        for attempt in 1..=attempts {
            match self.sink.write(&events).await {
                Ok(()) => {
                    self.metrics.record_batch_delivered(events.len());
                    return;
                }
                Err(error) => {
                    self.metrics.record_delivery_failure();
                    tracing::debug!(
                        attempt,
                        attempts,
                        error = %error,
                        "batch delivery attempt failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        self.metrics.record_batch_abandoned();
        tracing::warn!(
            events = events.len(),
            attempts,
            "dropping batch after exhausting delivery retries"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::queue::QueueConfig;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::mocks::MockSink;

    fn make_queue(metrics: Metrics) -> BoundedEventQueue {
        BoundedEventQueue::new(
            QueueConfig::default(),
            Arc::new(SystemClock::new()),
            metrics,
        )
        .unwrap()
    }

    fn event(n: usize) -> Event {
        Event::new().with_field("seq", n as u64)
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            batch_size: 10,
            batch_timeout: Duration::from_millis(20),
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_config_validation() {
        let config = WorkerConfig {
            batch_size: 0,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            batch_timeout: Duration::ZERO,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            max_retries: 0,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_state_machine() {
        let metrics = Metrics::new();
        let queue = make_queue(metrics.clone());
        let sink = Arc::new(MockSink::new());
        let worker = DeliveryWorker::new(queue, sink, fast_config(), metrics).unwrap();

        assert_eq!(worker.state(), WorkerState::NotStarted);
        assert!(worker.start());
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(!worker.start());

        assert!(worker.stop(Duration::from_secs(1)).await);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_delivers_batches() {
        let metrics = Metrics::new();
        let queue = make_queue(metrics.clone());
        let sink = Arc::new(MockSink::new());
        let worker =
            DeliveryWorker::new(queue.clone(), sink.clone(), fast_config(), metrics.clone())
                .unwrap();
        worker.start();

        for i in 0..25 {
            queue.enqueue(event(i)).await;
        }

        worker.stop(Duration::from_secs(2)).await;

        assert_eq!(sink.delivered_events(), 25);
        assert_eq!(metrics.events_delivered(), 25);
        assert!(metrics.batches_delivered() >= 3); // batch_size = 10
    }

    #[tokio::test]
    async fn test_stop_drains_buffered_events() {
        let metrics = Metrics::new();
        let queue = make_queue(metrics.clone());
        let sink = Arc::new(MockSink::new());
        let worker =
            DeliveryWorker::new(queue.clone(), sink.clone(), fast_config(), metrics).unwrap();

        // Buffer before the worker ever runs.
        for i in 0..7 {
            queue.enqueue(event(i)).await;
        }

        worker.start();
        assert!(worker.stop(Duration::from_secs(2)).await);
        assert_eq!(sink.delivered_events(), 7);
    }

    #[tokio::test]
    async fn test_transient_sink_failure_is_retried() {
        let metrics = Metrics::new();
        let queue = make_queue(metrics.clone());
        let sink = Arc::new(MockSink::failing_times(1));
        let worker =
            DeliveryWorker::new(queue.clone(), sink.clone(), fast_config(), metrics.clone())
                .unwrap();
        worker.start();

        queue.enqueue(event(0)).await;
        worker.stop(Duration::from_secs(2)).await;

        assert_eq!(sink.delivered_events(), 1);
        assert_eq!(metrics.delivery_failures(), 1);
        assert_eq!(metrics.batches_abandoned(), 0);
    }

    #[tokio::test]
    async fn test_batch_abandoned_after_exhausting_retries() {
        let metrics = Metrics::new();
        let queue = make_queue(metrics.clone());
        let sink = Arc::new(MockSink::failing_times(usize::MAX));
        let worker =
            DeliveryWorker::new(queue.clone(), sink.clone(), fast_config(), metrics.clone())
                .unwrap();
        worker.start();

        queue.enqueue(event(0)).await;
        worker.stop(Duration::from_secs(2)).await;

        assert_eq!(sink.delivered_events(), 0);
        assert_eq!(metrics.batches_abandoned(), 1);
        // One initial attempt plus two retries.
        assert_eq!(metrics.delivery_failures(), 3);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_kill_the_loop() {
        let metrics = Metrics::new();
        let queue = make_queue(metrics.clone());
        let sink = Arc::new(MockSink::failing_times(3));
        let worker = DeliveryWorker::new(
            queue.clone(),
            sink.clone(),
            WorkerConfig {
                batch_size: 1,
                batch_timeout: Duration::from_millis(10),
                max_retries: 0,
                retry_delay: Duration::from_millis(1),
            },
            metrics.clone(),
        )
        .unwrap();
        worker.start();

        for i in 0..6 {
            queue.enqueue(event(i)).await;
        }
        worker.stop(Duration::from_secs(2)).await;

        // First three single-event batches fail (no retries), rest deliver.
        assert_eq!(metrics.batches_abandoned(), 3);
        assert_eq!(sink.delivered_events(), 3);
    }

    #[tokio::test]
    async fn test_stop_timeout_forces_shutdown() {
        let metrics = Metrics::new();
        let queue = make_queue(metrics.clone());
        // A sink that blocks long enough to trip the stop deadline.
        let sink = Arc::new(MockSink::with_delay(Duration::from_secs(30)));
        let worker = DeliveryWorker::new(queue.clone(), sink, fast_config(), metrics).unwrap();
        worker.start();

        queue.enqueue(event(0)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let clean = worker.stop(Duration::from_millis(100)).await;
        assert!(!clean);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }
}
