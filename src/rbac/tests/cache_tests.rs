//! Decision cache tests
//!
//! Hit/miss accounting, LRU eviction, invalidation, fingerprint stability and
//! single-flight computation under concurrency.

use cretoai_rbac::{
    CacheConfig, Decision, DecisionCache, EnforceRequest, Fingerprint, PolicyRule, RbacError,
};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;

fn cache(capacity: usize) -> DecisionCache {
    DecisionCache::new(CacheConfig::with_capacity(capacity)).unwrap()
}

fn allow(subject: &str) -> Decision {
    Decision::allow(PolicyRule::new(subject, "data1", "read"))
}

fn fp(subject: &str) -> Fingerprint {
    Fingerprint::of(&EnforceRequest::new(subject, "data1", "read"))
}

// ============================================================================
// BASIC CACHE OPERATIONS
// ============================================================================

#[tokio::test]
async fn test_set_get_invalidate() {
    let cache = cache(100);
    let key = fp("alice");

    assert!(cache.get(&key).is_none(), "Cache should be empty initially");

    cache.set(key, allow("alice"));
    assert_eq!(cache.get(&key), Some(allow("alice")));

    cache.invalidate();
    assert!(cache.get(&key).is_none(), "Invalidate must drop every entry");
}

#[tokio::test]
async fn test_stats_tracking() {
    let cache = cache(100);
    let key = fp("alice");

    cache.get(&key);
    cache.set(key, allow("alice"));
    cache.get(&key);
    cache.get(&key);

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.capacity, 100);
    assert!((stats.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_overwrite_is_not_eviction() {
    let cache = cache(2);
    let key = fp("alice");

    cache.set(key, allow("alice"));
    cache.set(key, Decision::deny(None));

    assert_eq!(cache.get(&key), Some(Decision::deny(None)));
    assert_eq!(cache.stats().evictions, 0);
    assert_eq!(cache.len(), 1);
}

// ============================================================================
// LRU EVICTION
// ============================================================================

#[tokio::test]
async fn test_lru_eviction() {
    let cache = cache(2);

    cache.set(fp("a"), allow("a"));
    cache.set(fp("b"), allow("b"));

    // Touch "a" so "b" becomes least recently used
    assert!(cache.get(&fp("a")).is_some());

    cache.set(fp("c"), allow("c"));

    assert!(cache.get(&fp("a")).is_some());
    assert!(cache.get(&fp("b")).is_none(), "Least recently used entry is evicted");
    assert!(cache.get(&fp("c")).is_some());
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_capacity_bound() {
    let cache = cache(50);
    for i in 0..500 {
        let subject = format!("user{}", i);
        cache.set(fp(&subject), allow(&subject));
    }

    assert_eq!(cache.len(), 50);
    assert_eq!(cache.stats().evictions, 450);
}

// ============================================================================
// FINGERPRINTS
// ============================================================================

#[test]
fn test_fingerprint_ignores_context_order() {
    let forward = EnforceRequest::new("alice", "data1", "read")
        .with_context("ip", "10.0.0.1")
        .with_context("time", "morning");
    let backward = EnforceRequest::new("alice", "data1", "read")
        .with_context("time", "morning")
        .with_context("ip", "10.0.0.1");

    assert_eq!(Fingerprint::of(&forward), Fingerprint::of(&backward));
}

#[test]
fn test_fingerprint_sensitivity() {
    let base = EnforceRequest::new("alice", "data1", "read");

    let variants = vec![
        EnforceRequest::new("bob", "data1", "read"),
        EnforceRequest::new("alice", "data2", "read"),
        EnforceRequest::new("alice", "data1", "write"),
        EnforceRequest::new("alice", "data1", "read").with_domain("d1"),
        EnforceRequest::new("alice", "data1", "read").with_context("ip", "10.0.0.1"),
        EnforceRequest::new("alicedata1", "", "read"),
    ];

    for variant in &variants {
        assert_ne!(
            Fingerprint::of(&base),
            Fingerprint::of(variant),
            "{:?} must not collide with the base request",
            variant
        );
    }
}

// ============================================================================
// SINGLE-FLIGHT
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_concurrent_misses() {
    let cache = Arc::new(cache(100));
    let computations = Arc::new(AtomicUsize::new(0));
    let key = fp("alice");

    let handles = (0..64).map(|_| {
        let cache = Arc::clone(&cache);
        let computations = Arc::clone(&computations);

        tokio::spawn(async move {
            cache
                .get_or_compute(key, || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(50)).await;
                    Ok(allow("alice"))
                })
                .await
        })
    });

    for result in join_all(handles).await {
        assert_eq!(result.unwrap(), Ok(allow("alice")));
    }

    assert_eq!(computations.load(Ordering::SeqCst), 1, "Exactly one computation");
    assert_eq!(cache.stats().computations, 1);
    assert_eq!(cache.get(&key), Some(allow("alice")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_is_per_fingerprint() {
    let cache = Arc::new(cache(100));
    let computations = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];

    for i in 0..40 {
        let cache = Arc::clone(&cache);
        let computations = Arc::clone(&computations);
        let subject = format!("user{}", i % 4);

        handles.push(tokio::spawn(async move {
            let decision = allow(&subject);
            cache
                .get_or_compute(fp(&subject), || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(30)).await;
                    Ok(decision)
                })
                .await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(computations.load(Ordering::SeqCst), 4);
    assert_eq!(cache.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiter_retries_after_failed_computation() {
    let cache = Arc::new(cache(100));
    let key = fp("alice");

    let failing = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .get_or_compute(key, || async {
                    sleep(Duration::from_millis(50)).await;
                    Err(RbacError::Evaluation("backend unavailable".to_string()))
                })
                .await
        })
    };

    sleep(Duration::from_millis(10)).await;

    let waiting = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .get_or_compute(key, || async { Ok(allow("alice")) })
                .await
        })
    };

    assert!(matches!(
        failing.await.unwrap(),
        Err(RbacError::Evaluation(_))
    ));
    assert_eq!(waiting.await.unwrap(), Ok(allow("alice")));
    assert_eq!(cache.get(&key), Some(allow("alice")));
    assert_eq!(cache.stats().computations, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalidate_during_computation_discards_result() {
    let cache = Arc::new(cache(100));
    let key = fp("alice");
    let (release, gate) = oneshot::channel::<()>();

    let flight = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .get_or_compute(key, || async move {
                    let _ = gate.await;
                    Ok(allow("alice"))
                })
                .await
        })
    };

    while cache.stats().computations == 0 {
        sleep(Duration::from_millis(1)).await;
    }

    cache.invalidate();
    release.send(()).unwrap();

    // The caller still gets its answer
    assert_eq!(flight.await.unwrap(), Ok(allow("alice")));

    // but the possibly stale result is not installed
    assert!(cache.get(&key).is_none());
    assert!(cache.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalidate_key_during_computation_discards_result() {
    let cache = Arc::new(cache(100));
    let key = fp("alice");
    let other = fp("bob");
    cache.set(other, allow("bob"));
    let (release, gate) = oneshot::channel::<()>();

    let flight = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .get_or_compute(key, || async move {
                    let _ = gate.await;
                    Ok(allow("alice"))
                })
                .await
        })
    };

    while cache.stats().computations == 0 {
        sleep(Duration::from_millis(1)).await;
    }

    assert!(!cache.invalidate_key(&key));
    release.send(()).unwrap();

    assert_eq!(flight.await.unwrap(), Ok(allow("alice")));
    assert!(cache.get(&key).is_none());

    // Other fingerprints are untouched
    assert_eq!(cache.get(&other), Some(allow("bob")));
}

#[tokio::test]
async fn test_get_or_compute_hits_cache() {
    let cache = cache(100);
    let key = fp("alice");
    let computations = AtomicUsize::new(0);
    cache.set(key, allow("alice"));

    let decision = cache
        .get_or_compute(key, || async {
            computations.fetch_add(1, Ordering::SeqCst);
            Ok(Decision::deny(None))
        })
        .await;

    assert_eq!(decision, Ok(allow("alice")));
    assert_eq!(computations.load(Ordering::SeqCst), 0);
    assert_eq!(cache.stats().computations, 0);
}
