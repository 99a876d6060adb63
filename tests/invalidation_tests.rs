//! Query-layer correctness: completeness checks, invalidation on writes,
//! and the empty-result sentinel.

mod common;

use std::sync::atomic::Ordering;

use serde_json::json;

use duocache::{Cache, CacheConfig, EvictionPolicyKind};

use common::{user_key, MockApi, TestUser};

fn cache_with(api: MockApi, config: CacheConfig) -> Cache<TestUser, MockApi> {
    Cache::new("user", api, config).unwrap()
}

fn default_cache(api: MockApi) -> Cache<TestUser, MockApi> {
    cache_with(api, CacheConfig::default())
}

#[tokio::test]
async fn test_list_served_from_cache_until_invalidated() {
    let api = MockApi::seeded(&[("u1", "Ada"), ("u2", "Grace"), ("u3", "Edsger")]);
    let cache = default_cache(api);

    let first = cache.list(&json!({}), &[], None).await.unwrap();
    assert_eq!(first.len(), 3);
    let second = cache.list(&json!({}), &[], None).await.unwrap();
    assert_eq!(second.len(), 3);
    assert_eq!(cache.api().calls.list.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_update_invalidates_queries_containing_the_item() {
    let api = MockApi::seeded(&[("u1", "Ada"), ("u2", "Grace"), ("u3", "Edsger")]);
    let cache = default_cache(api);

    assert_eq!(cache.list(&json!({}), &[], None).await.unwrap().len(), 3);
    assert_eq!(cache.api().calls.list.load(Ordering::SeqCst), 1);

    cache
        .update(&user_key("u2"), &json!({"name": "X"}))
        .await
        .unwrap();

    // The cached list contained u2, so the next list goes upstream.
    let refreshed = cache.list(&json!({}), &[], None).await.unwrap();
    assert_eq!(cache.api().calls.list.load(Ordering::SeqCst), 2);
    assert!(refreshed.iter().any(|u| u.id == "u2" && u.name == "X"));
}

#[tokio::test]
async fn test_removed_item_never_resurfaces_through_cached_list() {
    let api = MockApi::seeded(&[("u1", "Ada"), ("u2", "Grace")]);
    let cache = default_cache(api);

    assert_eq!(cache.list(&json!({}), &[], None).await.unwrap().len(), 2);
    cache.remove(&user_key("u2")).await.unwrap();

    let after = cache.list(&json!({}), &[], None).await.unwrap();
    assert_eq!(after.len(), 1);
    assert!(after.iter().all(|u| u.id != "u2"));
}

#[tokio::test]
async fn test_evicted_item_breaks_query_completeness() {
    // Room for only 2 items: caching a 2-item list works, but a third
    // fetched item evicts one of them, breaking the cached list.
    let api = MockApi::seeded(&[("u1", "Ada"), ("u2", "Grace")]);
    let mut config = CacheConfig::default().with_max_items(2);
    config.eviction.kind = EvictionPolicyKind::Lru;
    let cache = cache_with(api, config);

    assert_eq!(cache.list(&json!({}), &[], None).await.unwrap().len(), 2);
    assert_eq!(cache.api().calls.list.load(Ordering::SeqCst), 1);

    // A third entity pushes one list member out.
    cache.api().put(TestUser::new("u3", "Edsger"));
    assert!(cache.get(&user_key("u3")).await.unwrap().is_some());

    // Hydration fails on the evicted key, the fingerprint is dropped, and
    // the list is refetched rather than served with a hole.
    let refetched = cache.list(&json!({}), &[], None).await.unwrap();
    assert_eq!(refetched.len(), 3);
    assert_eq!(cache.api().calls.list.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_create_clears_all_cached_queries() {
    let api = MockApi::seeded(&[("u1", "Ada")]);
    let cache = default_cache(api);

    assert_eq!(cache.list(&json!({}), &[], None).await.unwrap().len(), 1);
    assert_eq!(cache.cached_query_count(), 1);

    cache
        .create(&json!({"id": "u2", "name": "Grace"}), &[])
        .await
        .unwrap();
    assert_eq!(cache.cached_query_count(), 0);

    let listed = cache.list(&json!({}), &[], None).await.unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn test_local_set_invalidates_containing_queries() {
    let api = MockApi::seeded(&[("u1", "Ada")]);
    let cache = default_cache(api);

    assert_eq!(cache.list(&json!({}), &[], None).await.unwrap().len(), 1);
    cache
        .set(&user_key("u1"), TestUser::new("u1", "Renamed"))
        .unwrap();

    // The fingerprint containing u1 is gone; the item itself is updated.
    assert_eq!(cache.cached_query_count(), 0);
    assert_eq!(
        cache.retrieve(&user_key("u1")).await.unwrap().unwrap().name,
        "Renamed"
    );
}

#[tokio::test]
async fn test_one_caches_empty_result_sentinel() {
    let api = MockApi::new();
    let cache = default_cache(api);

    let missing = cache.one(&json!({"id": "nope"}), &[]).await.unwrap();
    assert_eq!(missing, None);
    assert_eq!(cache.api().calls.one.load(Ordering::SeqCst), 1);

    // The "not found" answer is itself cached under the fingerprint.
    let missing = cache.one(&json!({"id": "nope"}), &[]).await.unwrap();
    assert_eq!(missing, None);
    assert_eq!(cache.api().calls.one.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_one_caches_hit_and_hydrates_it() {
    let api = MockApi::seeded(&[("u1", "Ada")]);
    let cache = default_cache(api);

    let found = cache.one(&json!({"id": "u1"}), &[]).await.unwrap().unwrap();
    assert_eq!(found.name, "Ada");
    let again = cache.one(&json!({"id": "u1"}), &[]).await.unwrap().unwrap();
    assert_eq!(again.name, "Ada");
    assert_eq!(cache.api().calls.one.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_paginated_list_not_reused_for_full_list() {
    let api = MockApi::seeded(&[("u1", "Ada"), ("u2", "Grace"), ("u3", "Edsger")]);
    let cache = default_cache(api);

    let page = cache
        .list(
            &json!({}),
            &[],
            Some(&duocache::ListOptions {
                limit: Some(2),
                offset: None,
            }),
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 2);

    // Different fingerprint entirely, so the unpaginated list goes upstream.
    let full = cache.list(&json!({}), &[], None).await.unwrap();
    assert_eq!(full.len(), 3);
    assert_eq!(cache.api().calls.list.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_find_caches_under_finder_fingerprint() {
    let api = MockApi::seeded(&[("u1", "Ada"), ("u2", "Grace")]);
    let cache = default_cache(api);

    let found = cache
        .find("byName", &json!({"name": "Ada"}), &[], None)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let again = cache
        .find("byName", &json!({"name": "Ada"}), &[], None)
        .await
        .unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(cache.api().calls.find.load(Ordering::SeqCst), 1);

    // A different finder name is a different fingerprint.
    cache
        .find_one("byName", &json!({"name": "Grace"}), &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cache.api().calls.find.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reset_clears_everything() {
    let api = MockApi::seeded(&[("u1", "Ada")]);
    let cache = default_cache(api);

    assert!(cache.get(&user_key("u1")).await.unwrap().is_some());
    assert_eq!(cache.list(&json!({}), &[], None).await.unwrap().len(), 1);
    assert!(cache.usage().item_count > 0);

    cache.reset();
    assert_eq!(cache.usage().item_count, 0);
    assert_eq!(cache.cached_query_count(), 0);

    // Everything refetches after a reset.
    assert!(cache.get(&user_key("u1")).await.unwrap().is_some());
    assert_eq!(cache.api().calls.get.load(Ordering::SeqCst), 2);
}
