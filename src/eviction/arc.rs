//! Adaptive Replacement Cache state.
//!
//! Residency is split into two virtual lists: T1 (recent-only) and T2
//! (frequent), derived from per-item frequency rather than stored. Two
//! bounded ghost lists, B1 and B2, remember recently evicted keys (no
//! payload, keys only). A ghost hit signals the corresponding real list was
//! too small and moves `target_recent_size` accordingly.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::eviction::config::ArcConfig;
use crate::keys::KeyHash;
use crate::metadata::{ItemMetadata, MetadataProvider};

/// A bounded set of evicted keys with FIFO aging.
#[derive(Debug, Default)]
pub(crate) struct GhostList {
    queue: VecDeque<KeyHash>,
    set: HashSet<KeyHash>,
}

impl GhostList {
    pub(crate) fn contains(&self, hash: &KeyHash) -> bool {
        self.set.contains(hash)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn remove(&mut self, hash: &KeyHash) -> bool {
        if self.set.remove(hash) {
            if let Some(pos) = self.queue.iter().position(|k| k == hash) {
                self.queue.remove(pos);
            }
            true
        } else {
            false
        }
    }

    /// Appends a key, dropping the oldest entries beyond `bound`.
    pub(crate) fn push(&mut self, hash: KeyHash, bound: usize) {
        if self.set.contains(&hash) {
            return;
        }
        self.set.insert(hash.clone());
        self.queue.push_back(hash);
        while self.queue.len() > bound {
            if let Some(oldest) = self.queue.pop_front() {
                self.set.remove(&oldest);
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.set.clear();
    }
}

#[derive(Debug)]
pub struct ArcState {
    config: ArcConfig,
    ghost_recent: GhostList,
    ghost_frequent: GhostList,
    target_recent_size: usize,
    last_decay: Instant,
}

impl ArcState {
    pub fn new(config: ArcConfig) -> Self {
        Self {
            config,
            ghost_recent: GhostList::default(),
            ghost_frequent: GhostList::default(),
            target_recent_size: 0,
            last_decay: Instant::now(),
        }
    }

    /// Current adaptation target for the recent list (test/introspection).
    pub fn target_recent_size(&self) -> usize {
        self.target_recent_size
    }

    pub fn ghost_sizes(&self) -> (usize, usize) {
        (self.ghost_recent.len(), self.ghost_frequent.len())
    }

    /// Ghost bound and adaptation ceiling: the configured item limit when
    /// one exists, the policy's own `max_cache_size` otherwise.
    fn capacity(&self, provider: &dyn MetadataProvider) -> usize {
        provider
            .size_limits()
            .max_items
            .map(|n| n as usize)
            .unwrap_or(self.config.max_cache_size)
    }

    pub fn on_access(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        self.adapt_on_ghost_hit(hash, provider);
        self.maybe_decay(provider);
    }

    /// A key being (re-)added may be reappearing from a ghost list; that is
    /// the adaptation signal ARC learns from.
    pub fn on_added(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        self.adapt_on_ghost_hit(hash, provider);
        self.maybe_decay(provider);
    }

    /// Remembers an evicted key in the ghost list matching the virtual list
    /// it was resident in. Called while the item's metadata is still
    /// available.
    pub fn on_removed(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        let bound = self.capacity(provider);
        let frequent = provider
            .metadata(hash)
            .map(|meta| self.is_frequent(&meta))
            .unwrap_or(false);
        if frequent {
            self.ghost_frequent.push(hash.clone(), bound);
        } else {
            self.ghost_recent.push(hash.clone(), bound);
        }
    }

    fn adapt_on_ghost_hit(&mut self, hash: &KeyHash, provider: &dyn MetadataProvider) {
        let step = self.config.adaptive_learning_rate.ceil().max(0.0) as usize;
        let ceiling = self.capacity(provider);

        if self.ghost_recent.remove(hash) {
            // T1 was too small: recent traffic is coming back.
            self.target_recent_size = (self.target_recent_size + step).min(ceiling);
        } else if self.ghost_frequent.remove(hash) {
            // T2 was too small.
            self.target_recent_size = self.target_recent_size.saturating_sub(step);
        }
    }

    fn effective_frequency(&self, meta: &ItemMetadata) -> f64 {
        if self.config.enable_frequency_decay {
            meta.frequency_score
        } else {
            meta.raw_frequency as f64
        }
    }

    fn is_frequent(&self, meta: &ItemMetadata) -> bool {
        if self.config.use_enhanced_frequency {
            self.effective_frequency(meta) >= self.config.frequency_threshold
        } else {
            meta.access_count > 1
        }
    }

    /// Victim ordering. Evicts from T1 while it exceeds the adaptation
    /// target, from T2 otherwise; the non-chosen list follows so the engine
    /// can keep taking victims under byte pressure.
    pub fn victim_ordering(
        &mut self,
        provider: &dyn MetadataProvider,
    ) -> Vec<(KeyHash, ItemMetadata)> {
        let mut recent = Vec::new();
        let mut frequent = Vec::new();
        for (hash, meta) in provider.all_metadata() {
            if self.is_frequent(&meta) {
                frequent.push((hash, meta));
            } else {
                recent.push((hash, meta));
            }
        }

        self.order_within_list(&mut recent, true);
        self.order_within_list(&mut frequent, false);

        let recent_first = recent.len() > self.target_recent_size || frequent.is_empty();
        let (mut first, second) = if recent_first {
            (recent, frequent)
        } else {
            (frequent, recent)
        };
        first.extend(second);
        first
    }

    fn order_within_list(&self, list: &mut [(KeyHash, ItemMetadata)], recent: bool) {
        if self.config.use_frequency_weighted_selection {
            let score = |meta: &ItemMetadata| -> f64 {
                let age_ms = meta.last_accessed_at.elapsed().as_millis() as f64;
                let freq = self.effective_frequency(meta).max(1.0);
                if recent {
                    age_ms + 1000.0 / freq
                } else {
                    age_ms / 1000.0 + 10.0 / freq
                }
            };
            list.sort_by(|(ka, ma), (kb, mb)| {
                score(ma)
                    .partial_cmp(&score(mb))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| ka.as_str().cmp(kb.as_str()))
            });
        } else {
            list.sort_by(|(ka, ma), (kb, mb)| {
                ma.last_accessed_at
                    .cmp(&mb.last_accessed_at)
                    .then_with(|| ma.added_at.cmp(&mb.added_at))
                    .then_with(|| ka.as_str().cmp(kb.as_str()))
            });
        }
    }

    /// Multiplies every frequency score by `1 - decay_factor` once per
    /// configured interval, with per-cycle decay capped at 0.9 so a large
    /// factor cannot zero the scores in one pass.
    fn maybe_decay(&mut self, provider: &mut dyn MetadataProvider) {
        if !self.config.enable_frequency_decay || self.config.decay_factor <= 0.0 {
            return;
        }
        let interval = Duration::from_millis(self.config.frequency_decay_interval_ms);
        if self.last_decay.elapsed() < interval {
            return;
        }
        self.last_decay = Instant::now();

        let keep = (1.0 - self.config.decay_factor).max(0.1);
        let now = Instant::now();
        for (hash, _) in provider.all_metadata() {
            let mut meta = match provider.metadata(&hash) {
                Some(meta) => meta,
                None => continue,
            };
            meta.frequency_score *= keep;
            meta.last_frequency_update = now;
            provider.set_metadata(&hash, meta);
        }
    }

    pub fn clear(&mut self) {
        self.ghost_recent.clear();
        self.ghost_frequent.clear();
        self.target_recent_size = 0;
    }
}
