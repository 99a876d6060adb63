//! Storage units for the two cache layers.

use std::time::{Duration, Instant};

use crate::keys::KeyHash;

/// A cached entity value plus its TTL window.
///
/// `created_at` is when this version entered the cache; `expires_at` is
/// `created_at + ttl`. A zero TTL produces an entry that is already expired
/// at creation, which the cache treats as a miss.
#[derive(Debug, Clone)]
pub struct CachedItem<V> {
    pub data: V,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl<V> CachedItem<V> {
    /// Wraps a value with a TTL window starting now.
    pub fn new(data: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            data,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Returns `true` once `now >= expires_at`. Monotone in time: an expired
    /// entry never becomes fresh again without a write.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// The TTL this entry was stored with.
    pub fn ttl(&self) -> Duration {
        self.expires_at.duration_since(self.created_at)
    }

    /// Time elapsed since this version entered the cache.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Rewrites the expiry to `now + ttl` without touching the payload.
    /// Used by the refresh coordinator to back off from a failing upstream.
    pub fn extend_ttl(&mut self, ttl: Duration) {
        self.expires_at = Instant::now() + ttl;
    }
}

/// A cached query result: the ordered keys it produced and whether the
/// result set was complete at the time of caching.
///
/// The result holds only [`KeyHash`] references into the item layer, never
/// payloads. If the item layer has since evicted one of the keys, hydration
/// fails and the result is invalidated on the spot.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub item_keys: Vec<KeyHash>,
    pub is_complete: bool,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl QueryResult {
    pub fn new(item_keys: Vec<KeyHash>, is_complete: bool, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            item_keys,
            is_complete,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn contains(&self, hash: &KeyHash) -> bool {
        self.item_keys.iter().any(|k| k == hash)
    }
}
