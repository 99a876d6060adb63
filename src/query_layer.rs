//! The query-result store: fingerprint to ordered key list.
//!
//! Results hold key references, never payloads, so an evicted item can
//! never be resurrected through a stale query result. Invalidation works
//! three ways: by contained item key, by location-path prefix, and
//! wholesale.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::entry::QueryResult;
use crate::keys::LocationRef;
use crate::query::{location_path, QueryFingerprint};

struct StoredQuery {
    result: QueryResult,
    /// Canonical location path of the fingerprinted query; empty for a
    /// root (primary-only) query.
    location_path: String,
}

#[derive(Default)]
pub struct QueryLayer {
    results: RwLock<HashMap<QueryFingerprint, StoredQuery>>,
}

impl QueryLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored result iff it has not expired. Expired results
    /// are dropped on the way out.
    pub fn get_result(&self, fp: &QueryFingerprint) -> Option<QueryResult> {
        let expired = {
            let results = self.results.read();
            match results.get(fp) {
                None => return None,
                Some(stored) => stored.result.is_expired(),
            }
        };
        if expired {
            self.results.write().remove(fp);
            return None;
        }
        self.results.read().get(fp).map(|s| s.result.clone())
    }

    /// Inserts or replaces the result for a fingerprint.
    pub fn set_result(
        &self,
        fp: QueryFingerprint,
        result: QueryResult,
        locations: &[LocationRef],
    ) {
        self.results.write().insert(
            fp,
            StoredQuery {
                result,
                location_path: location_path(locations),
            },
        );
    }

    /// Drops the result for one fingerprint. Returns `true` when present.
    pub fn invalidate(&self, fp: &QueryFingerprint) -> bool {
        self.results.write().remove(fp).is_some()
    }

    /// Removes every result whose key list contains `hash`. Returns the
    /// number of results dropped.
    pub fn invalidate_containing_item(&self, hash: &crate::keys::KeyHash) -> usize {
        let mut results = self.results.write();
        let before = results.len();
        results.retain(|_, stored| !stored.result.contains(hash));
        let dropped = before - results.len();
        if dropped > 0 {
            debug!(key = %hash, count = dropped, "invalidated query results containing item");
        }
        dropped
    }

    /// Removes every result whose location path starts with the given
    /// location prefix. Empty `locations` invalidates all root
    /// (primary-only) queries.
    pub fn invalidate_location(&self, locations: &[LocationRef]) -> usize {
        let prefix = location_path(locations);
        let mut results = self.results.write();
        let before = results.len();
        if prefix.is_empty() {
            results.retain(|_, stored| !stored.location_path.is_empty());
        } else {
            results.retain(|_, stored| !stored.location_path.starts_with(&prefix));
        }
        before - results.len()
    }

    pub fn clear(&self) {
        self.results.write().clear();
    }

    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }
}
