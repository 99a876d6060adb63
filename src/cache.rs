//! The operations orchestrator: the public cache surface.
//!
//! A [`Cache`] instance is bound to one entity type tag and one upstream
//! [`ItemApi`]. Reads thread through the item layer, the TTL engine and the
//! refresh coordinator; queries go through the fingerprint layer with
//! per-item hydration; writes invalidate exactly the query results they can
//! affect.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::api::{ActionOutcome, ItemApi, Keyed, ListOptions, ListResult};
use crate::config::{CacheConfig, WarmingQuery, WarmingSettings};
use crate::entry::QueryResult;
use crate::error::{ApiError, CacheError};
use crate::estimate::{JsonSizeEstimator, SizeEstimator};
use crate::inflight::InFlightRegistry;
use crate::item_layer::ItemLayer;
use crate::keys::{hash_key, EntityKey, KeyHash, LocationRef};
use crate::metadata::CacheUsage;
use crate::query::{QueryHasher, QueryKind};
use crate::query_layer::QueryLayer;
use crate::stats::CacheStats;
use crate::swr::{RefreshStatus, SwrCoordinator};
use crate::ttl::TtlEngine;
use crate::warmer::{CacheWarmer, WarmingOperation, WarmingStats};

/// A two-layer entity cache in front of an [`ItemApi`].
///
/// # Examples
///
/// ```no_run
/// use duocache::{Cache, CacheConfig, EntityKey, Keyed};
///
/// #[derive(Clone, serde::Serialize)]
/// struct User { id: String }
///
/// impl Keyed for User {
///     fn key(&self) -> EntityKey { EntityKey::new("user", self.id.as_str()) }
/// }
///
/// # async fn example<A: duocache::ItemApi<User> + 'static>(api: A) -> Result<(), duocache::CacheError> {
/// let cache = Cache::new("user", api, CacheConfig::default())?;
/// let user = cache.get(&EntityKey::new("user", "u1")).await?;
/// # Ok(())
/// # }
/// ```
pub struct Cache<V: Clone, A> {
    kt: String,
    api: Arc<A>,
    items: Arc<ItemLayer<V>>,
    queries: Arc<QueryLayer>,
    ttl_engine: Arc<TtlEngine>,
    swr: SwrCoordinator<V>,
    inflight: Arc<InFlightRegistry<V>>,
    warmer: Arc<CacheWarmer>,
    hasher: QueryHasher,
    stats: Arc<CacheStats>,
    bypass_cache: bool,
    warming: WarmingSettings,
}

impl<V: Clone, A> Clone for Cache<V, A> {
    fn clone(&self) -> Self {
        Self {
            kt: self.kt.clone(),
            api: self.api.clone(),
            items: self.items.clone(),
            queries: self.queries.clone(),
            ttl_engine: self.ttl_engine.clone(),
            swr: self.swr.clone(),
            inflight: self.inflight.clone(),
            warmer: self.warmer.clone(),
            hasher: self.hasher.clone(),
            stats: self.stats.clone(),
            bypass_cache: self.bypass_cache,
            warming: self.warming.clone(),
        }
    }
}

impl<V, A> Cache<V, A>
where
    V: Clone + Keyed + Serialize + Send + Sync + 'static,
    A: ItemApi<V> + Send + Sync + 'static,
{
    /// Builds a cache with the default JSON size estimator.
    pub fn new(kt: impl Into<String>, api: A, config: CacheConfig) -> Result<Self, CacheError> {
        Self::with_estimator(kt, api, config, Arc::new(JsonSizeEstimator))
    }
}

impl<V, A> Cache<V, A>
where
    V: Clone + Keyed + Send + Sync + 'static,
    A: ItemApi<V> + Send + Sync + 'static,
{
    /// Builds a cache with a custom size estimator.
    pub fn with_estimator(
        kt: impl Into<String>,
        api: A,
        config: CacheConfig,
        estimator: Arc<dyn SizeEstimator<V>>,
    ) -> Result<Self, CacheError> {
        let config = config.sanitized();
        config.validate()?;

        let items = Arc::new(ItemLayer::new(
            config.size_limits(),
            &config.eviction,
            estimator,
        )?);
        let ttl_engine = Arc::new(TtlEngine::new(config.ttl.clone()));
        let inflight = Arc::new(InFlightRegistry::new());
        let swr = SwrCoordinator::new(
            config.swr.clone(),
            items.clone(),
            ttl_engine.clone(),
            inflight.clone(),
        );
        let mut cycle = config.warming.cycle.clone();
        cycle.interval = config.warming.interval;
        let hasher = QueryHasher::new().with_orderless_fields(config.orderless_fields.clone());

        Ok(Self {
            kt: kt.into(),
            api: Arc::new(api),
            items,
            queries: Arc::new(QueryLayer::new()),
            ttl_engine,
            swr,
            inflight,
            warmer: Arc::new(CacheWarmer::new(cycle)),
            hasher,
            stats: Arc::new(CacheStats::new()),
            bypass_cache: config.bypass_cache,
            warming: config.warming,
        })
    }

    /// The entity type tag this cache serves.
    pub fn kt(&self) -> &str {
        &self.kt
    }

    /// The upstream API this cache fronts.
    pub fn api(&self) -> &A {
        &self.api
    }

    fn item_ttl(&self, key: &EntityKey) -> Duration {
        self.ttl_engine.calculate_item_ttl(&key.kt).ttl
    }

    fn api_get_fetcher(
        &self,
        key: &EntityKey,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<V, CacheError>> {
        let api = self.api.clone();
        let key = key.clone();
        move || {
            async move { api.get(&key).await.map_err(CacheError::from) }.boxed()
        }
    }

    /// Reads one entity. Fresh hits return immediately; stale hits return
    /// the cached value while a background refresh runs; misses fetch
    /// through the single-flight registry. Upstream `NotFound` becomes
    /// `Ok(None)` and is not cached.
    pub async fn get(&self, key: &EntityKey) -> Result<Option<V>, CacheError> {
        let hash = hash_key(key)?;
        if self.bypass_cache {
            return self.fetch_direct(key, &hash).await;
        }
        let ttl = self.item_ttl(key);
        self.swr.get(&hash, ttl, self.api_get_fetcher(key)).await
    }

    /// Like [`get`](Self::get), but counts a hit/miss: a resident fresh
    /// value is returned without any refresh side effects, anything else
    /// delegates to `get`.
    pub async fn retrieve(&self, key: &EntityKey) -> Result<Option<V>, CacheError> {
        let hash = hash_key(key)?;
        if self.bypass_cache {
            self.stats.record_miss();
            return self.fetch_direct(key, &hash).await;
        }
        match self.items.get(&hash) {
            Some(value) => {
                self.stats.record_hit();
                Ok(Some(value))
            }
            None => {
                self.stats.record_miss();
                self.get(key).await
            }
        }
    }

    async fn fetch_direct(&self, key: &EntityKey, hash: &KeyHash) -> Result<Option<V>, CacheError> {
        match self.api.get(key).await {
            Ok(value) => {
                // Bypass skips cache reads, not writes; the fetched value
                // still lands so later non-bypass readers benefit.
                self.items.set(hash, value.clone(), self.item_ttl(key));
                Ok(Some(value))
            }
            Err(ApiError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Queries for a list of entities. Served from the query layer when the
    /// fingerprint is cached and every referenced item is still resident
    /// and fresh; otherwise refetched, stored item-by-item, and
    /// fingerprinted. Paginated or `has_more` responses are stored as
    /// partial, under the faceted TTL.
    pub async fn list(
        &self,
        query: &Value,
        locations: &[LocationRef],
        options: Option<&ListOptions>,
    ) -> Result<Vec<V>, CacheError> {
        let api = self.api.clone();
        let query_owned = query.clone();
        let locations_owned = locations.to_vec();
        let options_owned = options.copied();
        self.cached_list(
            QueryKind::All,
            query,
            locations,
            options,
            1.0,
            !self.bypass_cache,
            move || async move {
                api.list(&query_owned, &locations_owned, options_owned.as_ref())
                    .await
            },
        )
        .await
    }

    /// A list of expected cardinality one. Both outcomes are cached under
    /// the fingerprint: a hit as a one-key list, a miss as the empty-result
    /// sentinel, so repeated "not found" answers are served from cache
    /// until the fingerprint expires.
    pub async fn one(
        &self,
        query: &Value,
        locations: &[LocationRef],
    ) -> Result<Option<V>, CacheError> {
        let api = self.api.clone();
        let query_owned = query.clone();
        let locations_owned = locations.to_vec();
        self.cached_one(QueryKind::One, query, locations, move || async move {
            api.one(&query_owned, &locations_owned).await
        })
        .await
    }

    /// Creates an entity upstream, caches it, and clears the query layer: a
    /// new entity may change the completeness of any cached list.
    pub async fn create(
        &self,
        partial: &Value,
        locations: &[LocationRef],
    ) -> Result<V, CacheError> {
        let value = self.api.create(partial, locations).await?;
        let key = value.key();
        let hash = hash_key(&key)?;
        self.items.set(&hash, value.clone(), self.item_ttl(&key));
        self.queries.clear();
        Ok(value)
    }

    /// Updates an entity upstream, caches the returned version, and
    /// invalidates every query result containing the key. Upstream
    /// `NotFound` propagates.
    pub async fn update(&self, key: &EntityKey, patch: &Value) -> Result<V, CacheError> {
        let hash = hash_key(key)?;
        let value = self.api.update(key, patch).await?;
        self.items.set(&hash, value.clone(), self.item_ttl(key));
        self.queries.invalidate_containing_item(&hash);
        Ok(value)
    }

    /// Removes an entity upstream, then locally, then from every query
    /// result containing it. Upstream `NotFound` propagates.
    pub async fn remove(&self, key: &EntityKey) -> Result<(), CacheError> {
        let hash = hash_key(key)?;
        self.api.remove(key).await?;
        self.items.delete(&hash);
        self.queries.invalidate_containing_item(&hash);
        Ok(())
    }

    /// A local write: caches the value without any upstream call and
    /// invalidates query results containing the key.
    pub fn set(&self, key: &EntityKey, value: V) -> Result<(), CacheError> {
        let hash = hash_key(key)?;
        self.items.set(&hash, value, self.item_ttl(key));
        self.queries.invalidate_containing_item(&hash);
        Ok(())
    }

    /// Runs a named action against one entity. Actions are conservatively
    /// treated as cache-invalidating: the query layer is cleared and every
    /// affected entity returned by the upstream is re-cached. The item
    /// layer itself is not cleared.
    pub async fn action(
        &self,
        key: &EntityKey,
        name: &str,
        body: &Value,
    ) -> Result<ActionOutcome<V>, CacheError> {
        hash_key(key)?;
        let outcome = self.api.action(key, name, body).await?;
        self.absorb_action(&outcome)?;
        Ok(outcome)
    }

    /// Runs a named action against the collection, with the same
    /// invalidation semantics as [`action`](Self::action).
    pub async fn all_action(
        &self,
        name: &str,
        body: &Value,
        locations: &[LocationRef],
    ) -> Result<ActionOutcome<V>, CacheError> {
        let outcome = self.api.all_action(name, body, locations).await?;
        self.absorb_action(&outcome)?;
        Ok(outcome)
    }

    fn absorb_action(&self, outcome: &ActionOutcome<V>) -> Result<(), CacheError> {
        self.queries.clear();
        for item in &outcome.affected_items {
            let key = item.key();
            let hash = hash_key(&key)?;
            self.items.set(&hash, item.clone(), self.item_ttl(&key));
        }
        if !outcome.affected_items.is_empty() {
            debug!(count = outcome.affected_items.len(), "re-cached action-affected items");
        }
        Ok(())
    }

    /// A computed view over one entity: pass-through, uncached.
    pub async fn facet(
        &self,
        key: &EntityKey,
        name: &str,
        params: &Value,
    ) -> Result<Value, CacheError> {
        hash_key(key)?;
        Ok(self.api.facet(key, name, params).await?)
    }

    /// A computed view over the collection: pass-through, uncached.
    pub async fn all_facet(
        &self,
        name: &str,
        params: &Value,
        locations: &[LocationRef],
    ) -> Result<Value, CacheError> {
        Ok(self.api.all_facet(name, params, locations).await?)
    }

    /// A named finder: list semantics under a finder-specific fingerprint.
    pub async fn find(
        &self,
        finder: &str,
        params: &Value,
        locations: &[LocationRef],
        options: Option<&ListOptions>,
    ) -> Result<Vec<V>, CacheError> {
        let api = self.api.clone();
        let finder_owned = finder.to_string();
        let params_owned = params.clone();
        let locations_owned = locations.to_vec();
        let options_owned = options.copied();
        self.cached_list(
            QueryKind::Find(finder.to_string()),
            params,
            locations,
            options,
            1.0,
            !self.bypass_cache,
            move || async move {
                api.find(
                    &finder_owned,
                    &params_owned,
                    &locations_owned,
                    options_owned.as_ref(),
                )
                .await
            },
        )
        .await
    }

    /// A named finder of expected cardinality one, with the same negative
    /// caching as [`one`](Self::one).
    pub async fn find_one(
        &self,
        finder: &str,
        params: &Value,
        locations: &[LocationRef],
    ) -> Result<Option<V>, CacheError> {
        let api = self.api.clone();
        let finder_owned = finder.to_string();
        let params_owned = params.clone();
        let locations_owned = locations.to_vec();
        self.cached_one(
            QueryKind::FindOne(finder.to_string()),
            params,
            locations,
            move || async move {
                api.find_one(&finder_owned, &params_owned, &locations_owned)
                    .await
            },
        )
        .await
    }

    /// Update-or-create. Not atomic across the read and the write: last
    /// write wins, convergent when the upstream enforces its own
    /// uniqueness.
    pub async fn upsert(
        &self,
        key: &EntityKey,
        partial: &Value,
        locations: &[LocationRef],
    ) -> Result<V, CacheError> {
        match self.get(key).await? {
            Some(_) => self.update(key, partial).await,
            None => self.create(partial, locations).await,
        }
    }

    /// Clears both layers and all refresh/fetch coordination state.
    pub fn reset(&self) {
        self.items.clear();
        self.queries.clear();
        self.swr.cleanup();
        self.inflight.clear();
    }

    // Query plumbing shared by `list`, `find`, and the warming path.

    #[allow(clippy::too_many_arguments)]
    async fn cached_list<F, Fut>(
        &self,
        kind: QueryKind,
        query: &Value,
        locations: &[LocationRef],
        options: Option<&ListOptions>,
        ttl_multiplier: f64,
        serve_cached: bool,
        fetch: F,
    ) -> Result<Vec<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ListResult<V>, ApiError>>,
    {
        // Pagination shapes the result set, so it is part of the identity
        // being fingerprinted; otherwise a partial page could be served for
        // the full query.
        let fp_params = match options {
            Some(o) if o.is_paginated() => serde_json::json!({
                "options": { "limit": o.limit, "offset": o.offset },
                "params": query,
            }),
            _ => query.clone(),
        };
        let fp = self
            .hasher
            .fingerprint(&self.kt, &kind, &fp_params, locations);

        if serve_cached {
            if let Some(cached) = self.queries.get_result(&fp) {
                match self.hydrate(&cached) {
                    Some(items) => return Ok(items),
                    None => {
                        // A referenced key is gone; the result lied.
                        self.queries.invalidate(&fp);
                    }
                }
            }
        }

        let result = match fetch().await {
            Ok(result) => result,
            Err(ApiError::NotFound) => ListResult::complete(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let is_complete =
            !options.map_or(false, |o| o.is_paginated()) && !result.metadata.has_more;
        let mut hashes = Vec::with_capacity(result.items.len());
        for item in &result.items {
            let key = item.key();
            let hash = hash_key(&key)?;
            let ttl = self.item_ttl(&key).mul_f64(ttl_multiplier);
            self.items.set(&hash, item.clone(), ttl);
            hashes.push(hash);
        }

        let query_ttl = self
            .ttl_engine
            .calculate_query_ttl(&kind, is_complete)
            .ttl
            .mul_f64(ttl_multiplier);
        self.queries.set_result(
            fp,
            QueryResult::new(hashes, is_complete, query_ttl),
            locations,
        );
        Ok(result.items)
    }

    async fn cached_one<F, Fut>(
        &self,
        kind: QueryKind,
        query: &Value,
        locations: &[LocationRef],
        fetch: F,
    ) -> Result<Option<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, ApiError>>,
    {
        let fp = self.hasher.fingerprint(&self.kt, &kind, query, locations);

        if !self.bypass_cache {
            if let Some(cached) = self.queries.get_result(&fp) {
                match cached.item_keys.first() {
                    None => return Ok(None), // cached empty-result sentinel
                    Some(hash) => match self.items.get(hash) {
                        Some(value) => return Ok(Some(value)),
                        None => {
                            self.queries.invalidate(&fp);
                        }
                    },
                }
            }
        }

        let fetched = match fetch().await {
            Ok(value) => value,
            Err(ApiError::NotFound) => None,
            Err(err) => return Err(err.into()),
        };

        let query_ttl = self.ttl_engine.calculate_query_ttl(&kind, true).ttl;
        match fetched {
            Some(value) => {
                let key = value.key();
                let hash = hash_key(&key)?;
                self.items.set(&hash, value.clone(), self.item_ttl(&key));
                self.queries.set_result(
                    fp,
                    QueryResult::new(vec![hash], true, query_ttl),
                    locations,
                );
                Ok(Some(value))
            }
            None => {
                self.queries.set_result(
                    fp,
                    QueryResult::new(Vec::new(), true, query_ttl),
                    locations,
                );
                Ok(None)
            }
        }
    }

    /// Materializes a cached query result from the item layer, or reports
    /// it broken when any referenced key is gone.
    fn hydrate(&self, result: &QueryResult) -> Option<Vec<V>> {
        let mut items = Vec::with_capacity(result.item_keys.len());
        for hash in &result.item_keys {
            items.push(self.items.get(hash)?);
        }
        Some(items)
    }

    // Warming.

    /// Registers the configured warming queries and starts the interval
    /// timer (the first cycle runs immediately). A no-op when warming is
    /// disabled in the configuration.
    pub fn start_warming(&self) {
        if !self.warming.enabled {
            return;
        }
        for query in &self.warming.queries {
            self.warmer.add_operation(self.warming_operation(query));
        }
        self.warmer.start();
    }

    pub fn stop_warming(&self) {
        self.warmer.stop();
    }

    /// Stops warming, clears warming operations, and aborts in-flight
    /// refreshes. Idempotent.
    pub fn cleanup(&self) {
        self.warmer.cleanup();
        self.swr.cleanup();
    }

    fn warming_operation(&self, query: &WarmingQuery) -> WarmingOperation {
        let cache = self.clone();
        let params = query.params.clone();
        let locations = query.locations.clone();
        let multiplier = query.ttl_multiplier.unwrap_or(1.0).max(0.0);
        WarmingOperation {
            id: query.id.clone(),
            params: query.params.clone(),
            priority: query.priority,
            ttl_multiplier: query.ttl_multiplier,
            fetcher: Arc::new(move || {
                let cache = cache.clone();
                let params = params.clone();
                let locations = locations.clone();
                async move {
                    let api = cache.api.clone();
                    let params_inner = params.clone();
                    let locations_inner = locations.clone();
                    // Warming always refetches; serving the cached result
                    // would warm nothing.
                    let items = cache
                        .cached_list(
                            QueryKind::All,
                            &params,
                            &locations,
                            None,
                            multiplier,
                            false,
                            move || async move {
                                api.list(&params_inner, &locations_inner, None).await
                            },
                        )
                        .await?;
                    Ok(items.len() as u64)
                }
                .boxed()
            }),
        }
    }

    // Introspection.

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn usage(&self) -> CacheUsage {
        self.items.usage()
    }

    pub fn cached_query_count(&self) -> usize {
        self.queries.len()
    }

    pub fn is_refreshing(&self, key: &EntityKey) -> Result<bool, CacheError> {
        Ok(self.swr.is_refreshing(&hash_key(key)?))
    }

    pub fn refresh_status(&self) -> RefreshStatus {
        self.swr.refresh_status()
    }

    pub fn warming_stats(&self) -> WarmingStats {
        self.warmer.stats()
    }

    pub fn eviction_strategy(&self) -> &'static str {
        self.items.strategy_name()
    }
}
