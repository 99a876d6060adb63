//! Cold-miss fetch deduplication.
//!
//! Concurrent fetches of the same absent key collapse onto one shared
//! upstream call: the first caller installs a shared future, every
//! concurrent caller clones and awaits the same handle, and the handle is
//! removed on completion whether it succeeded or failed. Distinct from the
//! refresh coordinator's pending map, which tracks background refreshes of
//! stale data.

use std::future::Future;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::error::CacheError;
use crate::keys::KeyHash;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

pub struct InFlightRegistry<V: Clone> {
    pending: DashMap<KeyHash, SharedFetch<V>>,
}

impl<V: Clone> Default for InFlightRegistry<V> {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> InFlightRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Awaits the in-flight fetch for `hash`, starting one with `make` if
    /// none exists. All concurrent callers for the same key receive the
    /// same result, errors included.
    pub async fn fetch<F, Fut>(&self, hash: &KeyHash, make: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        let shared = {
            match self.pending.entry(hash.clone()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let fut: SharedFetch<V> = make().boxed().shared();
                    entry.insert(fut.clone());
                    fut
                }
            }
            // Entry guard dropped here; never held across an await.
        };

        let result = shared.clone().await;

        // Only remove the handle this call observed. A same-key fetch that
        // started after completion must not be torn down by a late waiter.
        self.pending.remove_if(hash, |_, current| current.ptr_eq(&shared));
        result
    }

    /// `true` while a fetch for `hash` is in flight.
    pub fn is_inflight(&self, hash: &KeyHash) -> bool {
        self.pending.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops all pending handles. In-flight futures already cloned by
    /// waiters keep running; only the dedup index is reset.
    pub fn clear(&self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::keys::hash_key;
    use crate::EntityKey;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn key(n: u32) -> KeyHash {
        hash_key(&EntityKey::new("user", n as i64)).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_call() {
        let registry = Arc::new(InFlightRegistry::<String>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let registry = registry.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .fetch(&key(1), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("value".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failure_shared_and_handle_removed() {
        let registry = Arc::new(InFlightRegistry::<String>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let registry = registry.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .fetch(&key(1), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err::<String, _>(ApiError::Server("boom".into()).into())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A failed fetch must not poison the key: the next call runs fresh.
        let result = registry
            .fetch(&key(1), || async { Ok("recovered".to_string()) })
            .await;
        assert_eq!(result.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_independently() {
        let registry = InFlightRegistry::<u32>::new();
        let a = registry.fetch(&key(1), || async { Ok(1) }).await.unwrap();
        let b = registry.fetch(&key(2), || async { Ok(2) }).await.unwrap();
        assert_eq!((a, b), (1, 2));
    }
}
