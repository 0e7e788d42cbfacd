//! # logsluice
//!
//! Resilient event-processing core for structured-logging pipelines.
//!
//! This crate buffers, deduplicates, rate-limits, and delivers streams of
//! structured events from many concurrent producers — without unbounded
//! memory growth, without losing correctness under races, and without one
//! failing downstream dependency stalling ingestion.
//!
//! ## Components
//!
//! - [`EventPipeline`]: builder-assembled composition of everything below
//! - [`BoundedEventQueue`]: FIFO queue with drop / block / sample overflow
//!   strategies and a batch [`DeliveryWorker`]
//! - [`AsyncCache`]: single-flight cache with TTL expiry, LRU eviction, and
//!   negative caching of factory failures
//! - [`Throttle`]: per-key sliding-window rate limiter with a hard
//!   cardinality bound
//! - [`Deduplicator`]: content-signature suppression over a sliding window
//! - [`CircuitBreaker`]: fail-fast isolation of a misbehaving downstream
//! - [`CleanupManager`]: interval/threshold-gated background reclamation
//!   under a hard deadline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use logsluice::{
//!     DedupConfig, Event, EventPipeline, OverflowStrategy, QueueConfig, ThrottleConfig,
//!     TracingSink,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let pipeline = EventPipeline::builder(Arc::new(TracingSink::new()))
//!     .with_queue(QueueConfig {
//!         capacity: 50_000,
//!         overflow_strategy: OverflowStrategy::Drop,
//!         sampling_rate: 1.0,
//!     })
//!     .with_dedup(DedupConfig {
//!         fields: vec!["level".to_string(), "message".to_string()],
//!         window: Duration::from_secs(30),
//!         ..DedupConfig::default()
//!     })
//!     .with_throttle(ThrottleConfig {
//!         key_field: "source".to_string(),
//!         max_rate: 500,
//!         window: Duration::from_secs(60),
//!         ..ThrottleConfig::default()
//!     })
//!     .build()
//!     .expect("valid configuration");
//! pipeline.start();
//!
//! pipeline
//!     .submit(
//!         Event::new()
//!             .with_field("source", "billing")
//!             .with_field("level", "ERROR")
//!             .with_field("message", "payment gateway timeout"),
//!     )
//!     .await;
//!
//! // A saturated queue or a suppressed event is a silent, metered drop,
//! // never an error on the producer path.
//! let snapshot = pipeline.metrics().snapshot();
//! println!("dropped: {}", snapshot.events_dropped);
//!
//! pipeline.shutdown(Duration::from_secs(5)).await;
//! # }
//! ```
//!
//! ## Design
//!
//! Decisions for the same key are serialized at that key's shard lock, so
//! rate-limit and dedup answers are exact even under thousands of concurrent
//! calls; operations on different keys never suspend on each other. Expected
//! outcomes — a full queue, a duplicate, a throttled event — are values
//! ([`EnqueueOutcome`], [`SubmitOutcome`], `Option<Event>`), never errors;
//! errors are reserved for invalid configuration, factory failures, and the
//! open circuit.
//!
//! Per-key state is bounded twice over: sliding windows purge lazily on
//! access, and the key maps themselves cap distinct-key cardinality with
//! least-recently-touched eviction. A [`CleanupManager`] sweeps idle keys in
//! the background so memory is reclaimed even for keys that never get
//! touched again.
//!
//! ## Memory Management
//!
//! All state is bounded at construction time: queue capacity, cache
//! `max_size`, and the processors' `max_tracked_keys`. Evicting a
//! still-active throttle key can reset its budget; that is the documented
//! price of a hard memory bound under high-cardinality keys. Watch
//! `keys_evicted` in [`MetricsSnapshot`] — a high rate means the bound is
//! too small for the key cardinality, or a high-cardinality field (request
//! IDs, trace IDs) is being used as the throttle key by mistake.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Shared configuration error
pub mod config;

// Re-export commonly used types for convenience
pub use domain::{
    event::Event,
    signature::{EventSignature, HashAlgorithm},
    window::SlidingWindow,
};

pub use application::{
    cache::{AsyncCache, CacheConfig, CacheStats, FactoryError},
    circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitOpenError, CircuitState,
    },
    cleanup::{CleanupConfig, CleanupHandle, CleanupManager, ShutdownError},
    dedup::{DedupConfig, Deduplicator},
    metrics::{Metrics, MetricsSnapshot},
    pipeline::{EventPipeline, PipelineBuilder, SubmitOutcome},
    ports::{CleanupTarget, Clock, Sink, SinkError},
    queue::{BoundedEventQueue, EnqueueOutcome, OverflowStrategy, QueueConfig, QueueItem},
    throttle::{LimitStrategy, Throttle, ThrottleConfig},
    worker::{DeliveryWorker, WorkerConfig, WorkerState},
};

pub use config::ConfigError;

pub use infrastructure::{
    clock::SystemClock,
    sink::{GuardedSink, TracingSink},
    storage::KeyedStore,
};
