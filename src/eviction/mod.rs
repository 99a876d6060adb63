//! The eviction engine and its interchangeable policies.
//!
//! The engine is policy-agnostic: it forwards access/add/remove events to
//! the selected [`EvictionStrategy`] and, when an insertion would exceed the
//! configured limits, asks the strategy for an ordered victim list. The
//! strategy set is closed, so dispatch is a plain `match` with no vtable.
//!
//! A strategy failure never corrupts the cache: the engine logs it and
//! treats the round as "no eviction".

mod arc;
mod config;
mod lfu;
mod sketch;
mod two_q;

pub use arc::ArcState;
pub use config::{ArcConfig, EvictionConfig, EvictionPolicyKind, LfuConfig, TwoQConfig};
pub use lfu::LfuState;
pub use sketch::CountMinSketch;
pub use two_q::TwoQState;

use tracing::warn;

use crate::error::CacheError;
use crate::keys::KeyHash;
use crate::metadata::{CacheUsage, ItemMetadata, MetadataProvider, SizeLimits};

/// The pressure snapshot handed to a strategy when eviction may be needed.
#[derive(Debug, Clone, Copy)]
pub struct EvictionContext {
    pub current: CacheUsage,
    pub limits: SizeLimits,
    /// Estimated size of the incoming item, when the trigger is an insert.
    pub new_item_size: Option<u64>,
}

impl EvictionContext {
    /// Eviction is needed when admitting one more item would exceed the
    /// item-count limit, or its bytes would exceed the byte limit.
    pub fn eviction_needed(&self) -> bool {
        let over_items = self
            .limits
            .max_items
            .is_some_and(|max| self.current.item_count + 1 > max);
        let over_bytes = self.limits.max_size_bytes.is_some_and(|max| {
            self.current.size_bytes + self.new_item_size.unwrap_or(0) > max
        });
        over_items || over_bytes
    }
}

/// One of the seven interchangeable eviction policies.
///
/// Stateless policies are unit variants; LFU, ARC and 2Q carry their
/// internal state (sketch, ghost lists, queues) in the variant payload.
#[derive(Debug)]
pub enum EvictionStrategy {
    Lru,
    Mru,
    Fifo,
    Random,
    Lfu(LfuState),
    Arc(Box<ArcState>),
    TwoQ(Box<TwoQState>),
    #[cfg(test)]
    Failing,
}

impl EvictionStrategy {
    /// Builds the strategy selected by `config`, which must already be
    /// sanitized; residual violations are rejected here.
    pub fn from_config(config: &EvictionConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(match config.kind {
            EvictionPolicyKind::Lru => EvictionStrategy::Lru,
            EvictionPolicyKind::Mru => EvictionStrategy::Mru,
            EvictionPolicyKind::Fifo => EvictionStrategy::Fifo,
            EvictionPolicyKind::Random => EvictionStrategy::Random,
            EvictionPolicyKind::Lfu => EvictionStrategy::Lfu(LfuState::new(config.lfu.clone())),
            EvictionPolicyKind::Arc => {
                EvictionStrategy::Arc(Box::new(ArcState::new(config.arc.clone())))
            }
            EvictionPolicyKind::TwoQ => {
                EvictionStrategy::TwoQ(Box::new(TwoQState::new(config.two_q.clone())))
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            EvictionStrategy::Lru => "lru",
            EvictionStrategy::Mru => "mru",
            EvictionStrategy::Fifo => "fifo",
            EvictionStrategy::Random => "random",
            EvictionStrategy::Lfu(_) => "lfu",
            EvictionStrategy::Arc(_) => "arc",
            EvictionStrategy::TwoQ(_) => "2q",
            #[cfg(test)]
            EvictionStrategy::Failing => "failing",
        }
    }

    pub fn on_item_accessed(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        match self {
            EvictionStrategy::Lfu(state) => state.on_access(hash, provider),
            EvictionStrategy::Arc(state) => state.on_access(hash, provider),
            EvictionStrategy::TwoQ(state) => state.on_access(hash, provider),
            _ => {}
        }
    }

    pub fn on_item_added(
        &mut self,
        hash: &KeyHash,
        _estimated_size: u64,
        provider: &mut dyn MetadataProvider,
    ) {
        match self {
            EvictionStrategy::Lfu(state) => state.on_added(hash, provider),
            EvictionStrategy::Arc(state) => state.on_added(hash, provider),
            EvictionStrategy::TwoQ(state) => state.on_added(hash, provider),
            _ => {}
        }
    }

    pub fn on_item_removed(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        match self {
            EvictionStrategy::Arc(state) => state.on_removed(hash, provider),
            EvictionStrategy::TwoQ(state) => state.on_removed(hash, provider),
            _ => {}
        }
    }

    /// Drops policy-internal state (ghost lists, queues, sketch counters).
    pub fn clear(&mut self) {
        match self {
            EvictionStrategy::Lfu(state) => state.clear(),
            EvictionStrategy::Arc(state) => state.clear(),
            EvictionStrategy::TwoQ(state) => state.clear(),
            _ => {}
        }
    }

    /// Returns the ordered victim list for the given pressure context. The
    /// list may be shorter than the pressure demands when the cache holds
    /// fewer candidates.
    pub fn select_for_eviction(
        &mut self,
        provider: &dyn MetadataProvider,
        context: &EvictionContext,
    ) -> Result<Vec<KeyHash>, CacheError> {
        let ordering = match self {
            EvictionStrategy::Lru => order_by_recency(provider, false),
            EvictionStrategy::Mru => order_by_recency(provider, true),
            EvictionStrategy::Fifo => order_by_insertion(provider),
            EvictionStrategy::Random => order_randomly(provider),
            EvictionStrategy::Lfu(state) => state.victim_ordering(provider),
            EvictionStrategy::Arc(state) => state.victim_ordering(provider),
            EvictionStrategy::TwoQ(state) => state.victim_ordering(provider),
            #[cfg(test)]
            EvictionStrategy::Failing => {
                return Err(CacheError::Eviction("injected failure".into()))
            }
        };
        Ok(take_until_fits(ordering, context))
    }
}

/// LRU / MRU ordering: smallest (or largest) `last_accessed_at` first, ties
/// broken by insertion order, then by key for full determinism.
fn order_by_recency(
    provider: &dyn MetadataProvider,
    most_recent_first: bool,
) -> Vec<(KeyHash, ItemMetadata)> {
    let mut candidates = provider.all_metadata();
    candidates.sort_by(|(ka, ma), (kb, mb)| {
        let recency = ma.last_accessed_at.cmp(&mb.last_accessed_at);
        let recency = if most_recent_first {
            recency.reverse()
        } else {
            recency
        };
        recency
            .then_with(|| {
                let insertion = ma.added_at.cmp(&mb.added_at);
                if most_recent_first {
                    insertion.reverse()
                } else {
                    insertion
                }
            })
            .then_with(|| ka.as_str().cmp(kb.as_str()))
    });
    candidates
}

/// FIFO ordering: smallest `added_at` first.
fn order_by_insertion(provider: &dyn MetadataProvider) -> Vec<(KeyHash, ItemMetadata)> {
    let mut candidates = provider.all_metadata();
    candidates.sort_by(|(ka, ma), (kb, mb)| {
        ma.added_at
            .cmp(&mb.added_at)
            .then_with(|| ka.as_str().cmp(kb.as_str()))
    });
    candidates
}

/// Uniform random ordering via a partial Fisher-Yates shuffle; victims are
/// drawn from the front, so only as many positions as are consumed get
/// shuffled.
fn order_randomly(provider: &dyn MetadataProvider) -> Vec<(KeyHash, ItemMetadata)> {
    let mut candidates = provider.all_metadata();
    let len = candidates.len();
    for i in 0..len.saturating_sub(1) {
        let j = i + fastrand::usize(..len - i);
        candidates.swap(i, j);
    }
    candidates
}

/// Takes victims from the front of the ordering until one more item fits
/// under both limits. At least one victim is taken whenever the ordering is
/// non-empty (the engine only asks when eviction is needed).
fn take_until_fits(
    ordering: Vec<(KeyHash, ItemMetadata)>,
    context: &EvictionContext,
) -> Vec<KeyHash> {
    let incoming = context.new_item_size.unwrap_or(0);
    let mut item_count = context.current.item_count;
    let mut size_bytes = context.current.size_bytes;
    let mut victims = Vec::new();

    for (hash, meta) in ordering {
        let items_fit = context
            .limits
            .max_items
            .map_or(true, |max| item_count + 1 <= max);
        let bytes_fit = context
            .limits
            .max_size_bytes
            .map_or(true, |max| size_bytes + incoming <= max);
        if items_fit && bytes_fit && !victims.is_empty() {
            break;
        }
        item_count = item_count.saturating_sub(1);
        size_bytes = size_bytes.saturating_sub(meta.estimated_size);
        victims.push(hash);
    }
    victims
}

/// Policy-agnostic engine: owns the strategy, performs the generic per-item
/// bookkeeping, and contains strategy failures.
#[derive(Debug)]
pub struct EvictionEngine {
    strategy: EvictionStrategy,
}

impl EvictionEngine {
    pub fn new(config: &EvictionConfig) -> Result<Self, CacheError> {
        Ok(Self {
            strategy: EvictionStrategy::from_config(config)?,
        })
    }

    #[cfg(test)]
    fn with_strategy(strategy: EvictionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Records one access: generic recency/frequency bookkeeping plus the
    /// policy hook.
    pub fn record_access(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        if let Some(mut meta) = provider.metadata(hash) {
            meta.touch();
            provider.set_metadata(hash, meta);
        }
        self.strategy.on_item_accessed(hash, provider);
    }

    /// Records an insertion or replacement. Replacements reset the metadata,
    /// mirroring the item layer's fresh `created_at`.
    pub fn record_add(&mut self, hash: &KeyHash, size: u64, provider: &mut dyn MetadataProvider) {
        provider.set_metadata(hash, ItemMetadata::new(size));
        self.strategy.on_item_added(hash, size, provider);
    }

    /// Records a removal (explicit delete, expiry, or eviction). The policy
    /// hook runs while the metadata is still present so ARC/2Q can classify
    /// the departing key.
    pub fn record_remove(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        self.strategy.on_item_removed(hash, provider);
        provider.delete_metadata(hash);
    }

    /// Drops policy-internal state; the metadata store is cleared by the
    /// caller alongside it.
    pub fn clear_policy_state(&mut self) {
        self.strategy.clear();
    }

    /// Returns the victims to remove before admitting one more item, or an
    /// empty list when no eviction is needed or the strategy failed.
    pub fn select_victims(
        &mut self,
        provider: &dyn MetadataProvider,
        context: &EvictionContext,
    ) -> Vec<KeyHash> {
        if !context.eviction_needed() {
            return Vec::new();
        }
        match self.strategy.select_for_eviction(provider, context) {
            Ok(victims) => victims,
            Err(err) => {
                warn!(
                    strategy = self.strategy.name(),
                    error = %err,
                    "eviction strategy failed, skipping eviction this round"
                );
                Vec::new()
            }
        }
    }
}
