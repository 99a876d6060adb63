//! The upstream interface the cache consumes.
//!
//! `ItemApi` is the seam between the cache core and whatever actually
//! fetches entities (an HTTP client, a database, a fixture in tests). The
//! cache never constructs entities itself; it stores what the API returns,
//! keyed by the entity's own key via [`Keyed`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::keys::{EntityKey, LocationRef};

/// An entity that knows its own key. Required so list and finder results
/// can be stored item-by-item.
pub trait Keyed {
    fn key(&self) -> EntityKey;
}

/// Pagination options for `list` and `find`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ListOptions {
    /// A paginated request cannot be assumed to have returned the full
    /// result set.
    pub fn is_paginated(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

/// Result-set metadata reported by the upstream alongside list items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub total: Option<u64>,
    pub returned: u64,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub has_more: bool,
}

/// Items plus metadata, as returned by `list`, `find`.
#[derive(Debug, Clone)]
pub struct ListResult<V> {
    pub items: Vec<V>,
    pub metadata: ResultMetadata,
}

impl<V> ListResult<V> {
    pub fn complete(items: Vec<V>) -> Self {
        let returned = items.len() as u64;
        Self {
            items,
            metadata: ResultMetadata {
                returned,
                ..Default::default()
            },
        }
    }
}

/// The result of an action: an opaque outcome plus the entities the action
/// touched (which the cache re-caches).
#[derive(Debug, Clone)]
pub struct ActionOutcome<V> {
    pub result: Value,
    pub affected_items: Vec<V>,
}

/// The remote item-fetching interface. All methods may fail with
/// [`ApiError::NotFound`], [`ApiError::Network`] or [`ApiError::Server`].
#[async_trait]
pub trait ItemApi<V>: Send + Sync {
    async fn get(&self, key: &EntityKey) -> Result<V, ApiError>;

    async fn list(
        &self,
        query: &Value,
        locations: &[LocationRef],
        options: Option<&ListOptions>,
    ) -> Result<ListResult<V>, ApiError>;

    async fn one(&self, query: &Value, locations: &[LocationRef]) -> Result<Option<V>, ApiError>;

    async fn create(&self, partial: &Value, locations: &[LocationRef]) -> Result<V, ApiError>;

    async fn update(&self, key: &EntityKey, patch: &Value) -> Result<V, ApiError>;

    async fn remove(&self, key: &EntityKey) -> Result<(), ApiError>;

    async fn action(
        &self,
        key: &EntityKey,
        name: &str,
        body: &Value,
    ) -> Result<ActionOutcome<V>, ApiError>;

    async fn all_action(
        &self,
        name: &str,
        body: &Value,
        locations: &[LocationRef],
    ) -> Result<ActionOutcome<V>, ApiError>;

    async fn facet(&self, key: &EntityKey, name: &str, params: &Value) -> Result<Value, ApiError>;

    async fn all_facet(
        &self,
        name: &str,
        params: &Value,
        locations: &[LocationRef],
    ) -> Result<Value, ApiError>;

    async fn find(
        &self,
        finder: &str,
        params: &Value,
        locations: &[LocationRef],
        options: Option<&ListOptions>,
    ) -> Result<ListResult<V>, ApiError>;

    async fn find_one(
        &self,
        finder: &str,
        params: &Value,
        locations: &[LocationRef],
    ) -> Result<Option<V>, ApiError>;
}
