//! # duocache
//!
//! A two-layer client-side entity cache that sits between application code
//! and a remote item-fetching API.
//!
//! ## Features
//!
//! - **Two-layer storage**: entities live in an item layer keyed by
//!   canonical key hash; query results live in a separate fingerprint layer
//!   holding only key references, so a stale query can never resurrect an
//!   evicted item
//! - **Eviction policies**: LRU, LFU (optionally with a Count-Min Sketch),
//!   FIFO, MRU, Random, ARC with ghost-list adaptation, and 2Q, all behind
//!   one policy-agnostic engine
//! - **TTL management**: per-item-type defaults, distinct complete/faceted
//!   query TTLs, and fresh/stale/expired classification
//! - **Stale-while-revalidate**: stale reads return immediately while a
//!   single deduplicated background refresh runs per key; expired reads
//!   race the in-flight refresh against a short grace window
//! - **Single-flight fetches**: concurrent cold misses for one key collapse
//!   onto one upstream call
//! - **Cache warming**: priority-ordered, concurrency-limited refresh
//!   cycles on a timer, with statistics
//!
//! ## Module Organization
//!
//! - [`keys`] - Entity keys and canonical key hashing
//! - [`query`] - Query kinds and deterministic fingerprinting
//! - [`eviction`] - The eviction engine and its seven policies
//! - [`ttl`] - TTL calculation and freshness classification
//! - [`swr`] - Stale-while-revalidate coordination
//! - [`warmer`] - Proactive cache warming
//! - [`api`] - The upstream interface the cache consumes
//! - [`config`] - Configuration surface and the size-string grammar
//!
//! The operations orchestrator, [`Cache`], ties the subsystems into the
//! public `get`/`list`/`update`/`action` surface.

mod cache;
mod entry;
mod error;
mod inflight;
mod item_layer;
mod query_layer;
mod stats;

pub mod api;
pub mod config;
pub mod estimate;
pub mod eviction;
pub mod keys;
pub mod metadata;
pub mod query;
pub mod swr;
pub mod ttl;
pub mod warmer;

pub use api::{ActionOutcome, ItemApi, Keyed, ListOptions, ListResult, ResultMetadata};
pub use cache::Cache;
pub use config::{parse_size, CacheConfig, WarmingQuery, WarmingSettings};
pub use entry::{CachedItem, QueryResult};
pub use error::{ApiError, CacheError};
pub use estimate::{JsonSizeEstimator, SizeEstimator};
pub use eviction::{EvictionConfig, EvictionPolicyKind};
pub use inflight::InFlightRegistry;
pub use item_layer::ItemLayer;
pub use keys::{EntityKey, KeyHash, KeyToken, LocationRef};
pub use query::{QueryFingerprint, QueryHasher, QueryKind};
pub use query_layer::QueryLayer;
pub use stats::CacheStats;
pub use swr::{RefreshStatus, SwrConfig, SwrCoordinator};
pub use ttl::{Freshness, TtlConfig, TtlEngine};
pub use warmer::{CacheWarmer, WarmerConfig, WarmingOperation, WarmingStats};
