//! 2Q eviction state.
//!
//! New items enter the A1 admission queue (FIFO). Accesses promote members
//! into the Am hot queue, either immediately (traditional 2Q) or once their
//! effective frequency reaches the promotion threshold. A bounded ghost
//! queue remembers keys evicted from A1; a re-added ghost key skips
//! admission and lands directly in Am.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::eviction::arc::GhostList;
use crate::eviction::config::TwoQConfig;
use crate::keys::KeyHash;
use crate::metadata::{ItemMetadata, MetadataProvider};

#[derive(Debug)]
pub struct TwoQState {
    config: TwoQConfig,
    /// A1: admission queue, FIFO order, front is the eviction candidate.
    admission: VecDeque<KeyHash>,
    admission_set: HashSet<KeyHash>,
    /// Am: hot queue membership. Ordering within Am is derived from
    /// metadata (`last_accessed_at`), not from insertion order.
    hot: HashSet<KeyHash>,
    ghost: GhostList,
    last_decay: Instant,
}

impl TwoQState {
    pub fn new(config: TwoQConfig) -> Self {
        Self {
            config,
            admission: VecDeque::new(),
            admission_set: HashSet::new(),
            hot: HashSet::new(),
            ghost: GhostList::default(),
            last_decay: Instant::now(),
        }
    }

    pub fn ghost_len(&self) -> usize {
        self.ghost.len()
    }

    pub fn admission_len(&self) -> usize {
        self.admission.len()
    }

    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    fn capacity(&self, provider: &dyn MetadataProvider) -> usize {
        provider
            .size_limits()
            .max_items
            .map(|n| n as usize)
            .unwrap_or(self.config.max_cache_size)
    }

    /// The number of slots A1 is entitled to before eviction starts draining
    /// it.
    fn admission_share(&self, provider: &dyn MetadataProvider) -> usize {
        let share = (self.capacity(provider) as f64 * self.config.admission_ratio).ceil() as usize;
        share.max(1)
    }

    pub fn on_added(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        if self.ghost.remove(hash) {
            // A ghost hit: the key proved itself once already.
            self.hot.insert(hash.clone());
        } else if !self.hot.contains(hash) && self.admission_set.insert(hash.clone()) {
            self.admission.push_back(hash.clone());
        }
        self.maybe_decay(provider);
    }

    pub fn on_access(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        if self.admission_set.contains(hash) {
            let promote = if self.config.use_frequency_promotion {
                provider
                    .metadata(hash)
                    .map(|meta| self.effective_frequency(&meta) >= self.config.promotion_threshold)
                    .unwrap_or(false)
            } else {
                true
            };
            if promote {
                self.remove_from_admission(hash);
                self.hot.insert(hash.clone());
            }
        }
        self.maybe_decay(provider);
    }

    pub fn on_removed(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        let bound = self.capacity(provider);
        if self.admission_set.contains(hash) {
            self.remove_from_admission(hash);
            self.ghost.push(hash.clone(), bound);
        } else {
            self.hot.remove(hash);
        }
    }

    fn remove_from_admission(&mut self, hash: &KeyHash) {
        if self.admission_set.remove(hash) {
            if let Some(pos) = self.admission.iter().position(|k| k == hash) {
                self.admission.remove(pos);
            }
        }
    }

    fn effective_frequency(&self, meta: &ItemMetadata) -> f64 {
        if self.config.enable_frequency_decay {
            meta.frequency_score
        } else {
            meta.raw_frequency as f64
        }
    }

    /// Victim ordering: A1 drains first (FIFO) while it exceeds its share;
    /// otherwise Am drains (LRU or frequency-weighted), with A1 appended as
    /// the fallback tail.
    pub fn victim_ordering(
        &mut self,
        provider: &dyn MetadataProvider,
    ) -> Vec<(KeyHash, ItemMetadata)> {
        let admission: Vec<(KeyHash, ItemMetadata)> = self
            .admission
            .iter()
            .filter_map(|hash| provider.metadata(hash).map(|meta| (hash.clone(), meta)))
            .collect();

        let mut hot: Vec<(KeyHash, ItemMetadata)> = self
            .hot
            .iter()
            .filter_map(|hash| provider.metadata(hash).map(|meta| (hash.clone(), meta)))
            .collect();

        if self.config.use_frequency_weighted_selection {
            let score = |meta: &ItemMetadata| -> f64 {
                let age_ms = meta.last_accessed_at.elapsed().as_millis() as f64;
                let freq = self.effective_frequency(meta).max(1.0);
                age_ms / 1000.0 + 10.0 / freq
            };
            hot.sort_by(|(ka, ma), (kb, mb)| {
                score(ma)
                    .partial_cmp(&score(mb))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| ka.as_str().cmp(kb.as_str()))
            });
        } else {
            hot.sort_by(|(ka, ma), (kb, mb)| {
                ma.last_accessed_at
                    .cmp(&mb.last_accessed_at)
                    .then_with(|| ma.added_at.cmp(&mb.added_at))
                    .then_with(|| ka.as_str().cmp(kb.as_str()))
            });
        }

        let drain_admission_first =
            !admission.is_empty() && admission.len() >= self.admission_share(provider);
        let (mut first, second) = if drain_admission_first {
            (admission, hot)
        } else {
            (hot, admission)
        };
        first.extend(second);
        first
    }

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
        for hash in self.hot.iter() {
            let mut meta = match provider.metadata(hash) {
                Some(meta) => meta,
                None => continue,
            };
            meta.frequency_score *= keep;
            meta.last_frequency_update = now;
            provider.set_metadata(hash, meta);
        }
    }

    pub fn clear(&mut self) {
        self.admission.clear();
        self.admission_set.clear();
        self.hot.clear();
        self.ghost.clear();
    }
}
