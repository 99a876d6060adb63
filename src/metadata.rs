//! Per-item eviction metadata and the provider interface strategies consume.

use std::collections::HashMap;
use std::time::Instant;

use crate::keys::KeyHash;

/// Bookkeeping the eviction engine maintains for every resident item.
///
/// The frequency fields serve the frequency-aware policies (LFU, ARC, 2Q):
/// `raw_frequency` is the undecayed access count, `frequency_score` the
/// decayed score, `last_frequency_update` the last time decay was applied.
/// Recency-only policies simply ignore them.
#[derive(Debug, Clone)]
pub struct ItemMetadata {
    pub added_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    pub estimated_size: u64,
    pub raw_frequency: u64,
    pub frequency_score: f64,
    pub last_frequency_update: Instant,
}

impl ItemMetadata {
    pub fn new(estimated_size: u64) -> Self {
        let now = Instant::now();
        Self {
            added_at: now,
            last_accessed_at: now,
            access_count: 0,
            estimated_size,
            raw_frequency: 0,
            frequency_score: 0.0,
            last_frequency_update: now,
        }
    }

    /// Records one access: recency, count, and frequency bookkeeping.
    pub fn touch(&mut self) {
        self.last_accessed_at = Instant::now();
        self.access_count = self.access_count.saturating_add(1);
        self.raw_frequency = self.raw_frequency.saturating_add(1);
        self.frequency_score += 1.0;
    }
}

/// Configured cache bounds. Either bound may be absent (unbounded).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeLimits {
    pub max_items: Option<u64>,
    pub max_size_bytes: Option<u64>,
}

impl SizeLimits {
    pub fn is_unbounded(&self) -> bool {
        self.max_items.is_none() && self.max_size_bytes.is_none()
    }
}

/// A point-in-time measurement of cache occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUsage {
    pub item_count: u64,
    pub size_bytes: u64,
}

/// The metadata view an [`EvictionStrategy`](crate::eviction::EvictionStrategy)
/// operates over. Implemented on top of the item layer's metadata map; the
/// strategy never touches item payloads.
pub trait MetadataProvider {
    fn metadata(&self, hash: &KeyHash) -> Option<ItemMetadata>;
    fn set_metadata(&mut self, hash: &KeyHash, meta: ItemMetadata);
    fn delete_metadata(&mut self, hash: &KeyHash);
    /// All resident entries. Iteration order is unspecified.
    fn all_metadata(&self) -> Vec<(KeyHash, ItemMetadata)>;
    fn current_usage(&self) -> CacheUsage;
    fn size_limits(&self) -> SizeLimits;
}

/// The concrete provider backing the item layer: a metadata map plus running
/// usage counters, so `current_usage` is O(1) instead of a sum over entries.
#[derive(Debug)]
pub struct MetadataStore {
    entries: HashMap<KeyHash, ItemMetadata>,
    usage: CacheUsage,
    limits: SizeLimits,
}

impl MetadataStore {
    pub fn new(limits: SizeLimits) -> Self {
        Self {
            entries: HashMap::new(),
            usage: CacheUsage::default(),
            limits,
        }
    }

    pub fn contains(&self, hash: &KeyHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.usage = CacheUsage::default();
    }

    /// Applies a closure to an entry in place, keeping the byte counter
    /// consistent if the closure changes the estimated size.
    pub fn update<F: FnOnce(&mut ItemMetadata)>(&mut self, hash: &KeyHash, f: F) {
        if let Some(meta) = self.entries.get_mut(hash) {
            let before = meta.estimated_size;
            f(meta);
            let after = meta.estimated_size;
            self.usage.size_bytes = self.usage.size_bytes - before + after;
        }
    }
}

impl MetadataProvider for MetadataStore {
    fn metadata(&self, hash: &KeyHash) -> Option<ItemMetadata> {
        self.entries.get(hash).cloned()
    }

    fn set_metadata(&mut self, hash: &KeyHash, meta: ItemMetadata) {
        match self.entries.insert(hash.clone(), meta) {
            Some(previous) => {
                self.usage.size_bytes = self.usage.size_bytes - previous.estimated_size
                    + self.entries[hash].estimated_size;
            }
            None => {
                self.usage.item_count += 1;
                self.usage.size_bytes += self.entries[hash].estimated_size;
            }
        }
    }

    fn delete_metadata(&mut self, hash: &KeyHash) {
        if let Some(previous) = self.entries.remove(hash) {
            self.usage.item_count = self.usage.item_count.saturating_sub(1);
            self.usage.size_bytes = self.usage.size_bytes.saturating_sub(previous.estimated_size);
        }
    }

    fn all_metadata(&self) -> Vec<(KeyHash, ItemMetadata)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn current_usage(&self) -> CacheUsage {
        self.usage
    }

    fn size_limits(&self) -> SizeLimits {
        self.limits
    }
}
