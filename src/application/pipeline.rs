//! Pipeline assembly.
//!
//! Wires the processors, queue, worker, and cleanup tickers into one
//! constructor-injected unit: producer → dedup → throttle → queue → worker →
//! sink. Every pipeline owns its own state, so independent pipelines (e.g.
//! in tests) are fully isolated.

use crate::application::cleanup::{CleanupConfig, CleanupHandle, CleanupManager};
use crate::application::dedup::{DedupConfig, Deduplicator};
use crate::application::metrics::Metrics;
use crate::application::ports::{CleanupTarget, Clock, Sink};
use crate::application::queue::{BoundedEventQueue, EnqueueOutcome, QueueConfig};
use crate::application::throttle::{Throttle, ThrottleConfig};
use crate::application::worker::{DeliveryWorker, WorkerConfig, WorkerState};
use crate::config::ConfigError;
use crate::domain::event::Event;
use crate::infrastructure::clock::SystemClock;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of submitting an event to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted into the queue for delivery.
    Enqueued,
    /// Suppressed as a duplicate.
    Duplicate,
    /// Suppressed by the throttle.
    Throttled,
    /// Discarded at the queue (full or shutting down).
    Dropped,
    /// Shed by the queue's sampling draw.
    Sampled,
}

impl SubmitOutcome {
    /// Whether the event will be delivered.
    pub fn is_enqueued(&self) -> bool {
        matches!(self, SubmitOutcome::Enqueued)
    }
}

/// Builder for an [`EventPipeline`].
pub struct PipelineBuilder {
    sink: Arc<dyn Sink>,
    queue_config: QueueConfig,
    worker_config: WorkerConfig,
    throttle_config: Option<ThrottleConfig>,
    dedup_config: Option<DedupConfig>,
    cleanup_config: CleanupConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl PipelineBuilder {
    /// Set the queue configuration.
    pub fn with_queue(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    /// Set the delivery worker configuration.
    pub fn with_worker(mut self, config: WorkerConfig) -> Self {
        self.worker_config = config;
        self
    }

    /// Enable throttling.
    pub fn with_throttle(mut self, config: ThrottleConfig) -> Self {
        self.throttle_config = Some(config);
        self
    }

    /// Enable deduplication.
    pub fn with_dedup(mut self, config: DedupConfig) -> Self {
        self.dedup_config = Some(config);
        self
    }

    /// Set the cleanup manager configuration used for the processors'
    /// background cleanup.
    pub fn with_cleanup(mut self, config: CleanupConfig) -> Self {
        self.cleanup_config = config;
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the pipeline.
    ///
    /// The worker and cleanup tickers are not running yet; call
    /// [`EventPipeline::start`].
    ///
    /// # Errors
    /// Returns `ConfigError` if any component configuration is invalid.
    pub fn build(self) -> Result<EventPipeline, ConfigError> {
        let metrics = Metrics::new();
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);

        let dedup = self
            .dedup_config
            .map(|config| Deduplicator::new(config, Arc::clone(&clock), metrics.clone()))
            .transpose()?
            .map(Arc::new);
        let throttle = self
            .throttle_config
            .map(|config| Throttle::new(config, Arc::clone(&clock), metrics.clone()))
            .transpose()?
            .map(Arc::new);

        let queue = BoundedEventQueue::new(self.queue_config, Arc::clone(&clock), metrics.clone())?;
        let worker = DeliveryWorker::new(
            queue.clone(),
            self.sink,
            self.worker_config,
            metrics.clone(),
        )?;

        let mut cleanup_managers = Vec::new();
        if let Some(dedup) = &dedup {
            cleanup_managers.push(CleanupManager::new(
                Arc::clone(dedup) as Arc<dyn CleanupTarget>,
                self.cleanup_config.clone(),
                Arc::clone(&clock),
                metrics.clone(),
            )?);
        }
        if let Some(throttle) = &throttle {
            cleanup_managers.push(CleanupManager::new(
                Arc::clone(throttle) as Arc<dyn CleanupTarget>,
                self.cleanup_config.clone(),
                Arc::clone(&clock),
                metrics.clone(),
            )?);
        }

        Ok(EventPipeline {
            dedup,
            throttle,
            queue,
            worker,
            cleanup_managers,
            cleanup_handles: Mutex::new(Vec::new()),
            metrics,
        })
    }
}

/// A fully wired event pipeline.
///
/// ```no_run
/// use logsluice::{DedupConfig, Event, EventPipeline, ThrottleConfig, TracingSink};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() {
/// let pipeline = EventPipeline::builder(Arc::new(TracingSink::new()))
///     .with_dedup(DedupConfig::default())
///     .with_throttle(ThrottleConfig::default())
///     .build()
///     .unwrap();
/// pipeline.start();
///
/// let outcome = pipeline
///     .submit(Event::new().with_field("message", "service started"))
///     .await;
/// assert!(outcome.is_enqueued());
///
/// pipeline.shutdown(Duration::from_secs(5)).await;
/// # }
/// ```
pub struct EventPipeline {
    dedup: Option<Arc<Deduplicator>>,
    throttle: Option<Arc<Throttle>>,
    queue: BoundedEventQueue,
    worker: DeliveryWorker,
    cleanup_managers: Vec<CleanupManager>,
    cleanup_handles: Mutex<Vec<CleanupHandle>>,
    metrics: Metrics,
}

impl EventPipeline {
    /// Start building a pipeline that delivers to `sink`.
    pub fn builder(sink: Arc<dyn Sink>) -> PipelineBuilder {
        PipelineBuilder {
            sink,
            queue_config: QueueConfig::default(),
            worker_config: WorkerConfig::default(),
            throttle_config: None,
            dedup_config: None,
            cleanup_config: CleanupConfig::default(),
            clock: None,
        }
    }

    /// Start the delivery worker and the processors' cleanup tickers.
    /// Returns false if already started.
    pub fn start(&self) -> bool {
        if !self.worker.start() {
            return false;
        }
        let mut handles = self
            .cleanup_handles
            .lock()
            .expect("pipeline handle mutex poisoned");
        for manager in &self.cleanup_managers {
            handles.push(manager.spawn_periodic());
        }
        true
    }

    /// Run an event through dedup and throttle, then offer it to the queue.
    pub async fn submit(&self, event: Event) -> SubmitOutcome {
        let event = match &self.dedup {
            Some(dedup) => match dedup.process(event) {
                Some(event) => event,
                None => return SubmitOutcome::Duplicate,
            },
            None => event,
        };

        let event = match &self.throttle {
            Some(throttle) => match throttle.process(event) {
                Some(event) => event,
                None => return SubmitOutcome::Throttled,
            },
            None => event,
        };

        match self.queue.enqueue(event).await {
            EnqueueOutcome::Accepted => SubmitOutcome::Enqueued,
            EnqueueOutcome::Dropped => SubmitOutcome::Dropped,
            EnqueueOutcome::Sampled => SubmitOutcome::Sampled,
        }
    }

    /// Stop the cleanup tickers, drain the worker, and wait up to `timeout`.
    /// Returns true for a clean drain.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let handles: Vec<CleanupHandle> = std::mem::take(
            &mut *self
                .cleanup_handles
                .lock()
                .expect("pipeline handle mutex poisoned"),
        );
        for handle in handles {
            if handle.shutdown().await.is_err() {
                tracing::warn!("cleanup ticker did not shut down cleanly");
            }
        }

        self.worker.stop(timeout).await
    }

    /// Number of events buffered in the queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// The worker's lifecycle state.
    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    /// The pipeline's shared metrics handle.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::queue::OverflowStrategy;
    use crate::infrastructure::mocks::MockSink;

    fn fast_worker() -> WorkerConfig {
        WorkerConfig {
            batch_size: 10,
            batch_timeout: Duration::from_millis(20),
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn message(text: &str) -> Event {
        Event::new()
            .with_field("source", "test")
            .with_field("message", text)
    }

    #[tokio::test]
    async fn test_end_to_end_delivery() {
        let sink = Arc::new(MockSink::new());
        let pipeline = EventPipeline::builder(sink.clone())
            .with_worker(fast_worker())
            .build()
            .unwrap();
        pipeline.start();

        for i in 0..5 {
            let outcome = pipeline.submit(message(&format!("event {}", i))).await;
            assert_eq!(outcome, SubmitOutcome::Enqueued);
        }

        assert!(pipeline.shutdown(Duration::from_secs(2)).await);
        assert_eq!(sink.delivered_events(), 5);
    }

    #[tokio::test]
    async fn test_duplicates_are_suppressed_before_the_queue() {
        let sink = Arc::new(MockSink::new());
        let pipeline = EventPipeline::builder(sink.clone())
            .with_worker(fast_worker())
            .with_dedup(DedupConfig::default())
            .build()
            .unwrap();
        pipeline.start();

        assert_eq!(pipeline.submit(message("same")).await, SubmitOutcome::Enqueued);
        assert_eq!(pipeline.submit(message("same")).await, SubmitOutcome::Duplicate);
        assert_eq!(pipeline.submit(message("other")).await, SubmitOutcome::Enqueued);

        pipeline.shutdown(Duration::from_secs(2)).await;
        assert_eq!(sink.delivered_events(), 2);
        assert_eq!(pipeline.metrics().events_deduplicated(), 1);
    }

    #[tokio::test]
    async fn test_throttle_runs_after_dedup() {
        let sink = Arc::new(MockSink::new());
        let pipeline = EventPipeline::builder(sink.clone())
            .with_worker(fast_worker())
            .with_throttle(ThrottleConfig {
                max_rate: 2,
                ..ThrottleConfig::default()
            })
            .build()
            .unwrap();
        pipeline.start();

        assert_eq!(pipeline.submit(message("a")).await, SubmitOutcome::Enqueued);
        assert_eq!(pipeline.submit(message("b")).await, SubmitOutcome::Enqueued);
        assert_eq!(pipeline.submit(message("c")).await, SubmitOutcome::Throttled);

        pipeline.shutdown(Duration::from_secs(2)).await;
        assert_eq!(sink.delivered_events(), 2);
    }

    #[tokio::test]
    async fn test_full_queue_reports_dropped() {
        let sink = Arc::new(MockSink::new());
        let pipeline = EventPipeline::builder(sink)
            .with_queue(QueueConfig {
                capacity: 2,
                overflow_strategy: OverflowStrategy::Drop,
                sampling_rate: 1.0,
            })
            .with_worker(fast_worker())
            .build()
            .unwrap();
        // Worker intentionally not started, so the queue fills up.

        assert_eq!(pipeline.submit(message("a")).await, SubmitOutcome::Enqueued);
        assert_eq!(pipeline.submit(message("b")).await, SubmitOutcome::Enqueued);
        assert_eq!(pipeline.submit(message("c")).await, SubmitOutcome::Dropped);
        assert_eq!(pipeline.queue_depth(), 2);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let pipeline = EventPipeline::builder(Arc::new(MockSink::new()))
            .with_worker(fast_worker())
            .build()
            .unwrap();

        assert!(pipeline.start());
        assert!(!pipeline.start());
        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_invalid_component_config_fails_at_build() {
        let result = EventPipeline::builder(Arc::new(MockSink::new()))
            .with_throttle(ThrottleConfig {
                max_rate: 0,
                ..ThrottleConfig::default()
            })
            .build();
        assert!(result.is_err());

        let result = EventPipeline::builder(Arc::new(MockSink::new()))
            .with_queue(QueueConfig {
                capacity: 0,
                ..QueueConfig::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pipelines_are_isolated() {
        let sink_a = Arc::new(MockSink::new());
        let sink_b = Arc::new(MockSink::new());

        let a = EventPipeline::builder(sink_a.clone())
            .with_worker(fast_worker())
            .with_dedup(DedupConfig::default())
            .build()
            .unwrap();
        let b = EventPipeline::builder(sink_b.clone())
            .with_worker(fast_worker())
            .with_dedup(DedupConfig::default())
            .build()
            .unwrap();
        a.start();
        b.start();

        // The same event is fresh in both pipelines: no shared state.
        assert_eq!(a.submit(message("shared")).await, SubmitOutcome::Enqueued);
        assert_eq!(b.submit(message("shared")).await, SubmitOutcome::Enqueued);

        a.shutdown(Duration::from_secs(2)).await;
        b.shutdown(Duration::from_secs(2)).await;
        assert_eq!(sink_a.delivered_events(), 1);
        assert_eq!(sink_b.delivered_events(), 1);
    }
}
