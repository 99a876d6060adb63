//! The remaining operation surface: retrieve counters, upsert, actions,
//! facets, and the bypass flag.

mod common;

use std::sync::atomic::Ordering;

use serde_json::json;

use duocache::{Cache, CacheConfig, CacheError};

use common::{user_key, MockApi, TestUser};

fn default_cache(api: MockApi) -> Cache<TestUser, MockApi> {
    Cache::new("user", api, CacheConfig::default()).unwrap()
}

#[tokio::test]
async fn test_retrieve_counts_hits_and_misses() {
    let api = MockApi::seeded(&[("u1", "Ada")]);
    let cache = default_cache(api);

    assert!(cache.retrieve(&user_key("u1")).await.unwrap().is_some()); // miss, fetch
    assert!(cache.retrieve(&user_key("u1")).await.unwrap().is_some()); // hit
    assert!(cache.retrieve(&user_key("u1")).await.unwrap().is_some()); // hit
    assert_eq!(cache.retrieve(&user_key("nope")).await.unwrap(), None); // miss

    assert_eq!(cache.stats().hits(), 2);
    assert_eq!(cache.stats().misses(), 2);
    assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_upsert_updates_existing_entity() {
    let api = MockApi::seeded(&[("u1", "Ada")]);
    let cache = default_cache(api);

    let updated = cache
        .upsert(&user_key("u1"), &json!({"name": "Ada L."}), &[])
        .await
        .unwrap();
    assert_eq!(updated.name, "Ada L.");
    assert_eq!(
        cache.retrieve(&user_key("u1")).await.unwrap().unwrap().name,
        "Ada L."
    );
}

#[tokio::test]
async fn test_upsert_creates_missing_entity() {
    let api = MockApi::new();
    let cache = default_cache(api);

    let created = cache
        .upsert(&user_key("u9"), &json!({"id": "u9", "name": "Grace"}), &[])
        .await
        .unwrap();
    assert_eq!(created, TestUser::new("u9", "Grace"));
    assert_eq!(
        cache.retrieve(&user_key("u9")).await.unwrap().unwrap().name,
        "Grace"
    );
}

#[tokio::test]
async fn test_action_clears_queries_and_recaches_affected_items() {
    let api = MockApi::seeded(&[("u1", "Ada"), ("u2", "Grace")]);
    let cache = default_cache(api);

    assert_eq!(cache.list(&json!({}), &[], None).await.unwrap().len(), 2);
    assert_eq!(cache.cached_query_count(), 1);

    let outcome = cache
        .action(&user_key("u1"), "promote", &json!({}))
        .await
        .unwrap();
    assert_eq!(outcome.result, json!({"action": "promote"}));
    assert_eq!(outcome.affected_items.len(), 1);

    // Query layer conservatively cleared; the affected item is re-cached
    // with its post-action state.
    assert_eq!(cache.cached_query_count(), 0);
    let user = cache.retrieve(&user_key("u1")).await.unwrap().unwrap();
    assert_eq!(user.name, "Ada (promoted)");
    assert_eq!(cache.api().calls.get.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_all_action_recaches_every_affected_item() {
    let api = MockApi::seeded(&[("u1", "Ada"), ("u2", "Grace")]);
    let cache = default_cache(api);

    let outcome = cache.all_action("sync", &json!({}), &[]).await.unwrap();
    assert_eq!(outcome.affected_items.len(), 2);
    assert_eq!(cache.usage().item_count, 2);
}

#[tokio::test]
async fn test_facets_pass_through_without_caching() {
    let api = MockApi::seeded(&[("u1", "Ada")]);
    let cache = default_cache(api);

    let facet = cache
        .facet(&user_key("u1"), "stats", &json!({}))
        .await
        .unwrap();
    assert_eq!(facet, json!({"facet": "stats", "key": "u1"}));

    let all = cache.all_facet("counts", &json!({}), &[]).await.unwrap();
    assert_eq!(all, json!({"facet": "counts", "count": 1}));

    assert_eq!(cache.cached_query_count(), 0);
    assert_eq!(cache.usage().item_count, 0);
}

#[tokio::test]
async fn test_update_of_missing_entity_propagates_not_found() {
    let api = MockApi::new();
    let cache = default_cache(api);

    let err = cache
        .update(&user_key("ghost"), &json!({"name": "x"}))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = cache.remove(&user_key("ghost")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_bypass_cache_always_round_trips() {
    let api = MockApi::seeded(&[("u1", "Ada")]);
    let mut config = CacheConfig::default();
    config.bypass_cache = true;
    let cache: Cache<TestUser, MockApi> = Cache::new("user", api, config).unwrap();

    assert!(cache.get(&user_key("u1")).await.unwrap().is_some());
    assert!(cache.get(&user_key("u1")).await.unwrap().is_some());
    assert!(cache.retrieve(&user_key("u1")).await.unwrap().is_some());
    assert_eq!(cache.api().calls.get.load(Ordering::SeqCst), 3);

    // Lists also skip the fingerprint read.
    cache.list(&json!({}), &[], None).await.unwrap();
    cache.list(&json!({}), &[], None).await.unwrap();
    assert_eq!(cache.api().calls.list.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_key_equality_closure_across_token_forms() {
    let api = MockApi::new();
    let cache = default_cache(api);

    // Written under a numeric token, read under the string form.
    cache
        .set(
            &duocache::EntityKey::new("user", 123i64),
            TestUser::new("123", "Numeric"),
        )
        .unwrap();
    let read = cache
        .retrieve(&duocache::EntityKey::new("user", "123"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.name, "Numeric");
}

#[tokio::test]
async fn test_invalid_keys_surface_everywhere() {
    let api = MockApi::new();
    let cache = default_cache(api);
    let bad = duocache::EntityKey::new("user", "");

    assert!(matches!(
        cache.get(&bad).await,
        Err(CacheError::InvalidKey(_))
    ));
    assert!(matches!(
        cache.retrieve(&bad).await,
        Err(CacheError::InvalidKey(_))
    ));
    assert!(matches!(
        cache.set(&bad, TestUser::new("x", "y")),
        Err(CacheError::InvalidKey(_))
    ));
    assert!(matches!(
        cache.remove(&bad).await,
        Err(CacheError::InvalidKey(_))
    ));
}
