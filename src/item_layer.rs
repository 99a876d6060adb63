//! The authoritative item store: canonical key hash to cached value.
//!
//! The layer couples three pieces under one write discipline: the entry map,
//! the eviction metadata, and the eviction engine. Victims selected during
//! an insertion are removed inside the same critical section, so no lookup
//! ever observes the new item alongside a victim that should be gone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::entry::CachedItem;
use crate::error::CacheError;
use crate::estimate::SizeEstimator;
use crate::eviction::{EvictionConfig, EvictionContext, EvictionEngine};
use crate::keys::KeyHash;
use crate::metadata::{CacheUsage, MetadataProvider, MetadataStore, SizeLimits};

/// Eviction bookkeeping: the engine and its metadata, guarded together so
/// strategy callbacks always see a consistent view.
struct Book {
    engine: EvictionEngine,
    store: MetadataStore,
}

pub struct ItemLayer<V> {
    entries: RwLock<HashMap<KeyHash, CachedItem<V>>>,
    book: Mutex<Book>,
    estimator: Arc<dyn SizeEstimator<V>>,
}

impl<V: Clone> ItemLayer<V> {
    pub fn new(
        limits: SizeLimits,
        eviction: &EvictionConfig,
        estimator: Arc<dyn SizeEstimator<V>>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            entries: RwLock::new(HashMap::new()),
            book: Mutex::new(Book {
                engine: EvictionEngine::new(eviction)?,
                store: MetadataStore::new(limits),
            }),
            estimator,
        })
    }

    /// Returns the value iff it is resident and unexpired. An expired entry
    /// is removed on the way out. Resident hits touch the eviction metadata.
    pub fn get(&self, hash: &KeyHash) -> Option<V> {
        let state = {
            let entries = self.entries.read();
            entries
                .get(hash)
                .map(|item| (item.data.clone(), item.is_expired()))
        };

        match state {
            None => None,
            Some((_, true)) => {
                self.remove_expired(hash);
                None
            }
            Some((value, false)) => {
                let book = &mut *self.book.lock();
                book.engine.record_access(hash, &mut book.store);
                Some(value)
            }
        }
    }

    /// Returns the entry regardless of freshness. Stale and expired entries
    /// stay resident; the refresh coordinator decides their fate. Hits touch
    /// the eviction metadata like `get`.
    pub fn get_raw(&self, hash: &KeyHash) -> Option<CachedItem<V>> {
        let item = self.entries.read().get(hash).cloned();
        if item.is_some() {
            let book = &mut *self.book.lock();
            book.engine.record_access(hash, &mut book.store);
        }
        item
    }

    /// Inserts or replaces a value with the given TTL. Returns the keys
    /// evicted to make room (empty when the cache fit).
    pub fn set(&self, hash: &KeyHash, value: V, ttl: Duration) -> Vec<KeyHash> {
        let size = self.estimator.estimate(&value);
        let book = &mut *self.book.lock();

        // Pressure is computed as if the key being written were absent, so
        // a replacement does not count itself twice.
        let mut current = book.store.current_usage();
        if let Some(old) = book.store.metadata(hash) {
            current.item_count = current.item_count.saturating_sub(1);
            current.size_bytes = current.size_bytes.saturating_sub(old.estimated_size);
        }
        let context = EvictionContext {
            current,
            limits: book.store.size_limits(),
            new_item_size: Some(size),
        };

        let victims: Vec<KeyHash> = book
            .engine
            .select_victims(&book.store, &context)
            .into_iter()
            .filter(|victim| victim != hash)
            .collect();
        for victim in &victims {
            book.engine.record_remove(victim, &mut book.store);
        }
        book.engine.record_add(hash, size, &mut book.store);

        let mut entries = self.entries.write();
        for victim in &victims {
            entries.remove(victim);
        }
        entries.insert(hash.clone(), CachedItem::new(value, ttl));
        drop(entries);

        if !victims.is_empty() {
            debug!(
                count = victims.len(),
                strategy = book.engine.strategy_name(),
                "evicted items to admit insert"
            );
        }
        victims
    }

    /// Removes an entry. Returns `true` when something was resident.
    pub fn delete(&self, hash: &KeyHash) -> bool {
        let book = &mut *self.book.lock();
        book.engine.record_remove(hash, &mut book.store);
        self.entries.write().remove(hash).is_some()
    }

    /// Drops all entries, metadata, and policy-internal state.
    pub fn clear(&self) {
        let book = &mut *self.book.lock();
        book.engine.clear_policy_state();
        book.store.clear();
        self.entries.write().clear();
    }

    /// Rewrites an entry's expiry to `now + ttl`, leaving the payload alone.
    /// Returns `false` when the key is not resident.
    pub fn extend_ttl(&self, hash: &KeyHash, ttl: Duration) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(hash) {
            Some(item) => {
                item.extend_ttl(ttl);
                true
            }
            None => false,
        }
    }

    /// `true` iff the key is resident and unexpired, without touching
    /// metadata.
    pub fn contains_fresh(&self, hash: &KeyHash) -> bool {
        self.entries
            .read()
            .get(hash)
            .map(|item| !item.is_expired())
            .unwrap_or(false)
    }

    /// Current occupancy: item count and estimated bytes.
    pub fn usage(&self) -> CacheUsage {
        self.book.lock().store.current_usage()
    }

    pub fn limits(&self) -> SizeLimits {
        self.book.lock().store.size_limits()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.book.lock().engine.strategy_name()
    }

    fn remove_expired(&self, hash: &KeyHash) {
        let book = &mut *self.book.lock();
        let mut entries = self.entries.write();
        // Re-check under the write lock; a concurrent set may have replaced
        // the entry with a fresh one.
        let still_expired = entries.get(hash).map(|i| i.is_expired()).unwrap_or(false);
        if still_expired {
            entries.remove(hash);
            book.engine.record_remove(hash, &mut book.store);
        }
    }
}
