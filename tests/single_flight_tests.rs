//! Concurrent cold misses for one key must collapse onto a single upstream
//! call.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use duocache::{Cache, CacheConfig, EntityKey};

use common::{user_key, MockApi, TestUser};

fn cache_with(api: MockApi, config: CacheConfig) -> Cache<TestUser, MockApi> {
    Cache::new("user", api, config).unwrap()
}

#[tokio::test]
async fn test_parallel_gets_share_one_upstream_call() {
    let api = MockApi::seeded(&[("u1", "Ada")]);
    api.set_latency(Duration::from_millis(50));
    let cache = Arc::new(cache_with(api, CacheConfig::default().with_max_items(100)));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.get(&user_key("u1")).await.unwrap()
        }));
    }

    for handle in handles {
        let user = handle.await.unwrap().unwrap();
        assert_eq!(user, TestUser::new("u1", "Ada"));
    }
    assert_eq!(cache.api().calls.get.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_distinct_keys_do_not_coalesce() {
    let api = MockApi::seeded(&[("u1", "Ada"), ("u2", "Grace")]);
    api.set_latency(Duration::from_millis(20));
    let cache = Arc::new(cache_with(api, CacheConfig::default()));

    let c1 = cache.clone();
    let c2 = cache.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { c1.get(&user_key("u1")).await.unwrap() }),
        tokio::spawn(async move { c2.get(&user_key("u2")).await.unwrap() }),
    );
    assert_eq!(a.unwrap().unwrap().name, "Ada");
    assert_eq!(b.unwrap().unwrap().name, "Grace");
    assert_eq!(cache.api().calls.get.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_resolved_fetch_serves_from_cache_afterwards() {
    let api = MockApi::seeded(&[("u1", "Ada")]);
    let cache = cache_with(api, CacheConfig::default());

    assert!(cache.get(&user_key("u1")).await.unwrap().is_some());
    assert!(cache.get(&user_key("u1")).await.unwrap().is_some());
    assert!(cache.get(&user_key("u1")).await.unwrap().is_some());
    // Only the first read reached the upstream.
    assert_eq!(cache.api().calls.get.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_key_returns_none_and_retries_next_time() {
    let api = MockApi::new();
    let cache = cache_with(api, CacheConfig::default());

    assert_eq!(cache.get(&user_key("ghost")).await.unwrap(), None);
    // NotFound is not cached as a tombstone; the next get asks again.
    assert_eq!(cache.get(&user_key("ghost")).await.unwrap(), None);
    assert_eq!(cache.api().calls.get.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_key_is_rejected_before_upstream() {
    let api = MockApi::new();
    let cache = cache_with(api, CacheConfig::default());

    let err = cache.get(&EntityKey::new("", "u1")).await.unwrap_err();
    assert!(matches!(err, duocache::CacheError::InvalidKey(_)));
    assert_eq!(cache.api().calls.get.load(Ordering::SeqCst), 0);
}
