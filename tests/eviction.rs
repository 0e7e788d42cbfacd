//! Cardinality bounds and LRU eviction across the cache and processors.

use logsluice::infrastructure::mocks::MockClock;
use logsluice::{
    AsyncCache, CacheConfig, CleanupConfig, CleanupManager, CleanupTarget, Clock, DedupConfig,
    Deduplicator, Event, Metrics, SystemClock, Throttle, ThrottleConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn keyed(source: &str) -> Event {
    Event::new()
        .with_field("source", source)
        .with_field("message", "payload")
}

#[test]
fn throttle_key_map_stays_bounded_under_high_cardinality() {
    let metrics = Metrics::new();
    let throttle = Throttle::new(
        ThrottleConfig {
            max_tracked_keys: 100,
            ..ThrottleConfig::default()
        },
        Arc::new(SystemClock::new()),
        metrics.clone(),
    )
    .unwrap();

    // Simulates a per-request ID mistakenly used as the throttle key.
    for i in 0..5_000 {
        throttle.process(keyed(&format!("request-{}", i)));
    }

    assert!(throttle.tracked_keys() <= 100);
    assert_eq!(metrics.keys_evicted(), 4_900);
}

#[test]
fn evicted_throttle_key_restarts_with_a_fresh_window() {
    let throttle = Throttle::new(
        ThrottleConfig {
            max_rate: 1,
            max_tracked_keys: 2,
            ..ThrottleConfig::default()
        },
        Arc::new(SystemClock::new()),
        Metrics::new(),
    )
    .unwrap();

    // Exhaust the budget for "victim".
    assert!(throttle.process(keyed("victim")).is_some());
    assert!(throttle.process(keyed("victim")).is_none());

    // Two newer keys push "victim" out of the bounded map.
    throttle.process(keyed("b"));
    throttle.process(keyed("c"));

    // Reappearing after eviction, the key gets a fresh budget. This is the
    // documented cost of the cardinality bound.
    assert!(throttle.process(keyed("victim")).is_some());
}

#[test]
fn dedup_signature_map_stays_bounded() {
    let dedup = Deduplicator::new(
        DedupConfig {
            max_tracked_keys: 50,
            ..DedupConfig::default()
        },
        Arc::new(SystemClock::new()),
        Metrics::new(),
    )
    .unwrap();

    for i in 0..2_000 {
        dedup.process(
            Event::new()
                .with_field("message", format!("unique message {}", i))
                .with_field("level", "WARN"),
        );
    }

    assert!(dedup.tracked_signatures() <= 50);
}

#[test]
fn cache_lru_prefers_recently_accessed_entries() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let cache: AsyncCache<String, u32> = AsyncCache::new(
        CacheConfig::new(3, Duration::from_secs(600)).unwrap(),
        clock.clone(),
    );

    cache.set("k1".into(), 1);
    clock.advance(Duration::from_secs(1));
    cache.set("k2".into(), 2);
    clock.advance(Duration::from_secs(1));
    cache.set("k3".into(), 3);
    clock.advance(Duration::from_secs(1));

    // Touch k1; k2 is now least recently used.
    assert_eq!(cache.get(&"k1".to_string()), Some(1));
    clock.advance(Duration::from_secs(1));

    cache.set("k4".into(), 4);

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get(&"k2".to_string()), None);
    assert_eq!(cache.get(&"k1".to_string()), Some(1));
    assert_eq!(cache.get(&"k3".to_string()), Some(3));
    assert_eq!(cache.get(&"k4".to_string()), Some(4));
}

#[tokio::test]
async fn background_cleanup_reclaims_idle_throttle_keys() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let metrics = Metrics::new();
    let throttle = Arc::new(
        Throttle::new(
            ThrottleConfig {
                window: Duration::from_secs(10),
                ..ThrottleConfig::default()
            },
            clock.clone(),
            metrics.clone(),
        )
        .unwrap(),
    );

    for i in 0..20 {
        throttle.process(keyed(&format!("burst-{}", i)));
    }
    assert_eq!(throttle.tracked_keys(), 20);

    clock.advance(Duration::from_secs(15));

    let manager = CleanupManager::new(
        Arc::clone(&throttle) as Arc<dyn CleanupTarget>,
        CleanupConfig::default(),
        clock.clone(),
        metrics.clone(),
    )
    .unwrap();

    assert_eq!(manager.force_cleanup(Some(clock.now())).await, Some(20));
    assert_eq!(throttle.tracked_keys(), 0);
    assert_eq!(metrics.cleanup_removed(), 20);
}

#[tokio::test]
async fn utilization_threshold_triggers_early_cleanup() {
    let clock = Arc::new(MockClock::new(Instant::now()));
    let throttle = Arc::new(
        Throttle::new(
            ThrottleConfig {
                window: Duration::from_secs(5),
                max_tracked_keys: 10,
                ..ThrottleConfig::default()
            },
            clock.clone(),
            Metrics::new(),
        )
        .unwrap(),
    );

    // Fill to 90% utilization with keys that will expire.
    for i in 0..9 {
        throttle.process(keyed(&format!("k{}", i)));
    }
    assert!(CleanupTarget::utilization(throttle.as_ref()) >= 0.8);

    let manager = CleanupManager::new(
        Arc::clone(&throttle) as Arc<dyn CleanupTarget>,
        CleanupConfig {
            cleanup_interval: Duration::from_secs(3600),
            threshold_ratio: 0.8,
            max_duration: Duration::from_secs(5),
        },
        clock.clone(),
        Metrics::new(),
    )
    .unwrap();

    // Complete one pass so the interval gate is armed; nothing has expired
    // yet, so the keys survive it.
    assert_eq!(manager.force_cleanup(Some(clock.now())).await, Some(0));
    assert_eq!(throttle.tracked_keys(), 9);

    clock.advance(Duration::from_secs(6));

    // The hour-long interval has not elapsed, but utilization has crossed
    // the threshold.
    assert!(manager.schedule_cleanup(clock.now(), false));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(throttle.tracked_keys(), 0);
}
