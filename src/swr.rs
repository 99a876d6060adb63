//! Stale-while-revalidate coordination.
//!
//! A read returns immediately with whatever the cache holds, fresh or
//! stale, while at most one background refresh per key brings it up to
//! date. Expired entries with a refresh already in flight race it against a
//! short grace window: if the refresh lands inside the window the caller
//! gets the fresh value, otherwise the pre-refresh value.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::inflight::InFlightRegistry;
use crate::item_layer::ItemLayer;
use crate::keys::KeyHash;
use crate::ttl::{Freshness, TtlEngine};

/// Refresh coordination settings.
#[derive(Debug, Clone)]
pub struct SwrConfig {
    /// Master switch. When off, stale entries are served until expiry and
    /// expired entries are refetched synchronously.
    pub enabled: bool,
    /// Cap on simultaneously running background refreshes. Stale triggers
    /// beyond the cap are dropped silently.
    pub max_concurrent_refreshes: usize,
    /// Hard deadline for one background refresh.
    pub refresh_timeout: Duration,
    /// On refresh failure, keep the cached entry alive instead of hammering
    /// a failing upstream.
    pub extend_ttl_on_error: bool,
    /// How long a failed-refresh entry stays serveable, from the failure.
    pub error_ttl_extension: Duration,
    /// How long an expired read waits for an in-flight refresh before
    /// settling for the stale value.
    pub grace_window: Duration,
}

impl Default for SwrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_refreshes: 10,
            refresh_timeout: Duration::from_secs(30),
            extend_ttl_on_error: true,
            error_ttl_extension: Duration::from_secs(300),
            grace_window: Duration::from_millis(100),
        }
    }
}

struct RefreshHandle {
    started_at: Instant,
    original_ttl: Duration,
    done_rx: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

/// One running background refresh, as reported by
/// [`SwrCoordinator::refresh_status`].
#[derive(Debug, Clone)]
pub struct ActiveRefresh {
    pub key: KeyHash,
    pub started_at: Instant,
    pub original_ttl: Duration,
}

/// Snapshot of the refresh coordinator's observable state.
#[derive(Debug, Clone)]
pub struct RefreshStatus {
    pub pending_refreshes: usize,
    pub max_concurrent: usize,
    pub active_refreshes: Vec<ActiveRefresh>,
}

pub struct SwrCoordinator<V: Clone> {
    config: SwrConfig,
    items: Arc<ItemLayer<V>>,
    ttl_engine: Arc<TtlEngine>,
    inflight: Arc<InFlightRegistry<V>>,
    refreshes: Arc<DashMap<KeyHash, RefreshHandle>>,
}

impl<V: Clone> Clone for SwrCoordinator<V> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            items: self.items.clone(),
            ttl_engine: self.ttl_engine.clone(),
            inflight: self.inflight.clone(),
            refreshes: self.refreshes.clone(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> SwrCoordinator<V> {
    pub fn new(
        config: SwrConfig,
        items: Arc<ItemLayer<V>>,
        ttl_engine: Arc<TtlEngine>,
        inflight: Arc<InFlightRegistry<V>>,
    ) -> Self {
        Self {
            config,
            items,
            ttl_engine,
            inflight,
            refreshes: Arc::new(DashMap::new()),
        }
    }

    /// The coordinated read. `make_fetch` builds one upstream fetch; it is
    /// invoked at most once per call, either synchronously (cold miss,
    /// deduplicated through the in-flight registry) or as a background
    /// refresh.
    ///
    /// Returns `Ok(None)` when the upstream reports the item absent.
    pub async fn get<F, Fut>(
        &self,
        hash: &KeyHash,
        ttl: Duration,
        make_fetch: F,
    ) -> Result<Option<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        let entry = match self.items.get_raw(hash) {
            Some(entry) => entry,
            None => return self.fetch_and_store(hash, ttl, make_fetch).await,
        };

        match self.ttl_engine.classify(entry.created_at, entry.ttl()) {
            Freshness::Fresh => Ok(Some(entry.data)),
            Freshness::Stale => {
                if self.config.enabled {
                    self.maybe_spawn_refresh(hash, ttl, make_fetch);
                }
                Ok(Some(entry.data))
            }
            Freshness::Expired => {
                if !self.config.enabled {
                    self.items.delete(hash);
                    return self.fetch_and_store(hash, ttl, make_fetch).await;
                }
                match self.refresh_receiver(hash) {
                    Some(rx) => Ok(Some(self.grace_race(hash, rx, entry.data).await)),
                    None => {
                        self.maybe_spawn_refresh(hash, ttl, make_fetch);
                        Ok(Some(entry.data))
                    }
                }
            }
        }
    }

    /// Races an in-flight refresh against the grace window. Whoever the
    /// race goes, the caller gets a value: the refreshed one if it landed in
    /// time, the pre-refresh one otherwise.
    async fn grace_race(&self, hash: &KeyHash, mut rx: watch::Receiver<bool>, stale: V) -> V {
        let completed = tokio::time::timeout(self.config.grace_window, async {
            // An error means the sender is gone, which also means the
            // refresh has concluded one way or the other.
            let _ = rx.wait_for(|done| *done).await;
        })
        .await
        .is_ok();

        if completed {
            if let Some(refreshed) = self.items.get_raw(hash) {
                if !refreshed.is_expired() {
                    return refreshed.data;
                }
            }
        }
        stale
    }

    async fn fetch_and_store<F, Fut>(
        &self,
        hash: &KeyHash,
        ttl: Duration,
        make_fetch: F,
    ) -> Result<Option<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        match self.inflight.fetch(hash, make_fetch).await {
            Ok(value) => {
                self.items.set(hash, value.clone(), ttl);
                Ok(Some(value))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Starts a background refresh unless one is already running for the
    /// key or the concurrency cap is reached (in which case the trigger is
    /// dropped; a later access may try again once a slot frees).
    fn maybe_spawn_refresh<F, Fut>(&self, hash: &KeyHash, ttl: Duration, make_fetch: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        if self.refreshes.contains_key(hash) {
            return;
        }
        if self.refreshes.len() >= self.config.max_concurrent_refreshes {
            debug!(key = %hash, "refresh concurrency cap reached, dropping trigger");
            return;
        }

        let (tx, rx) = watch::channel(false);
        // Register before spawning so a fast-completing task never races
        // its own bookkeeping.
        match self.refreshes.entry(hash.clone()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(RefreshHandle {
                    started_at: Instant::now(),
                    original_ttl: ttl,
                    done_rx: rx,
                    task: None,
                });
            }
        }

        let fetch = make_fetch();
        let items = self.items.clone();
        let refreshes = self.refreshes.clone();
        let config = self.config.clone();
        let key = hash.clone();
        let task = tokio::spawn(async move {
            match tokio::time::timeout(config.refresh_timeout, fetch).await {
                Ok(Ok(value)) => {
                    items.set(&key, value, ttl);
                }
                Ok(Err(err)) => {
                    warn!(key = %key, error = %err, "background refresh failed");
                    if config.extend_ttl_on_error {
                        items.extend_ttl(&key, config.error_ttl_extension);
                    }
                }
                Err(_) => {
                    warn!(key = %key, timeout = ?config.refresh_timeout, "background refresh timed out");
                    if config.extend_ttl_on_error {
                        items.extend_ttl(&key, config.error_ttl_extension);
                    }
                }
            }
            refreshes.remove(&key);
            let _ = tx.send(true);
        });

        if let Some(mut handle) = self.refreshes.get_mut(hash) {
            handle.task = Some(task);
        }
    }

    fn refresh_receiver(&self, hash: &KeyHash) -> Option<watch::Receiver<bool>> {
        self.refreshes.get(hash).map(|h| h.done_rx.clone())
    }

    /// `true` while a background refresh for `hash` is in flight.
    pub fn is_refreshing(&self, hash: &KeyHash) -> bool {
        self.refreshes.contains_key(hash)
    }

    pub fn refresh_status(&self) -> RefreshStatus {
        let active_refreshes = self
            .refreshes
            .iter()
            .map(|entry| ActiveRefresh {
                key: entry.key().clone(),
                started_at: entry.value().started_at,
                original_ttl: entry.value().original_ttl,
            })
            .collect();
        RefreshStatus {
            pending_refreshes: self.refreshes.len(),
            max_concurrent: self.config.max_concurrent_refreshes,
            active_refreshes,
        }
    }

    /// Aborts every in-flight refresh and drops the handles. Idempotent; a
    /// second call over an empty map is a no-op.
    pub fn cleanup(&self) {
        let keys: Vec<KeyHash> = self.refreshes.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.refreshes.remove(&key) {
                if let Some(task) = handle.task {
                    task.abort();
                }
            }
        }
    }
}

impl<V: Clone> Drop for SwrCoordinator<V> {
    fn drop(&mut self) {
        // Last owner out turns off the lights; clones share the maps.
        if Arc::strong_count(&self.refreshes) == 1 {
            for mut entry in self.refreshes.iter_mut() {
                if let Some(task) = entry.value_mut().task.take() {
                    task.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::FixedSizeEstimator;
    use crate::eviction::EvictionConfig;
    use crate::keys::hash_key;
    use crate::metadata::SizeLimits;
    use crate::ttl::TtlConfig;
    use crate::EntityKey;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn coordinator(config: SwrConfig) -> SwrCoordinator<String> {
        let items = Arc::new(
            ItemLayer::new(
                SizeLimits::default(),
                &EvictionConfig::default(),
                Arc::new(FixedSizeEstimator(1)),
            )
            .unwrap(),
        );
        let ttl_engine = Arc::new(TtlEngine::new(TtlConfig::default()));
        SwrCoordinator::new(config, items, ttl_engine, Arc::new(InFlightRegistry::new()))
    }

    fn key(n: u32) -> KeyHash {
        hash_key(&EntityKey::new("user", n as i64)).unwrap()
    }

    #[tokio::test]
    async fn test_cold_miss_fetches_and_caches() {
        let swr = coordinator(SwrConfig::default());
        let value = swr
            .get(&key(1), Duration::from_secs(60), || async {
                Ok("fetched".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, Some("fetched".to_string()));

        // Second read is served from cache; the fetcher must not run.
        let value = swr
            .get(&key(1), Duration::from_secs(60), || async {
                panic!("fetcher must not run on a fresh hit")
            })
            .await
            .unwrap();
        assert_eq!(value, Some("fetched".to_string()));
    }

    #[tokio::test]
    async fn test_not_found_returns_none_uncached() {
        let swr = coordinator(SwrConfig::default());
        let value = swr
            .get(&key(1), Duration::from_secs(60), || async {
                Err::<String, _>(crate::error::ApiError::NotFound.into())
            })
            .await
            .unwrap();
        assert_eq!(value, None);
        assert!(swr.items.is_empty());
    }

    #[tokio::test]
    async fn test_stale_read_serves_old_value_and_spawns_refresh() {
        let swr = coordinator(SwrConfig::default());
        let ttl = Duration::from_millis(500);
        swr.items.set(&key(1), "v1".to_string(), ttl);
        tokio::time::sleep(Duration::from_millis(420)).await;

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let value = swr
            .get(&key(1), ttl, move || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok("v2".to_string())
            })
            .await
            .unwrap();
        // Stale data now, refreshed data shortly.
        assert_eq!(value, Some("v1".to_string()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(swr.items.get(&key(1)), Some("v2".to_string()));
        assert!(!swr.is_refreshing(&key(1)));
    }

    #[tokio::test]
    async fn test_refresh_error_extends_ttl() {
        let swr = coordinator(SwrConfig {
            error_ttl_extension: Duration::from_secs(300),
            ..Default::default()
        });
        let ttl = Duration::from_millis(500);
        swr.items.set(&key(1), "v1".to_string(), ttl);
        tokio::time::sleep(Duration::from_millis(420)).await;

        let value = swr
            .get(&key(1), ttl, || async {
                Err::<String, _>(crate::error::ApiError::Server("boom".into()).into())
            })
            .await
            .unwrap();
        assert_eq!(value, Some("v1".to_string()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        // The entry survived the failed refresh with a fresh expiry.
        assert_eq!(swr.items.get(&key(1)), Some("v1".to_string()));
    }

    #[tokio::test]
    async fn test_concurrency_cap_drops_triggers() {
        let swr = coordinator(SwrConfig {
            max_concurrent_refreshes: 2,
            ..Default::default()
        });
        let ttl = Duration::from_millis(500);
        for n in 1..=5 {
            swr.items.set(&key(n), format!("v{n}"), ttl);
        }
        tokio::time::sleep(Duration::from_millis(420)).await;

        for n in 1..=5 {
            let _ = swr
                .get(&key(n), ttl, move || async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(format!("new{n}"))
                })
                .await
                .unwrap();
        }
        let status = swr.refresh_status();
        assert_eq!(status.pending_refreshes, 2);
        assert_eq!(status.max_concurrent, 2);
        swr.cleanup();
        assert_eq!(swr.refresh_status().pending_refreshes, 0);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let swr = coordinator(SwrConfig::default());
        swr.cleanup();
        swr.cleanup();
        assert_eq!(swr.refresh_status().pending_refreshes, 0);
    }
}
