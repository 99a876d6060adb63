//! TTL computation and freshness classification.
//!
//! The engine owns the default-TTL tables (per item type, per query
//! completeness) and classifies cached entries as fresh, stale-but-
//! serveable, or expired. Staleness begins at `staleness_threshold x ttl`
//! (default 0.8); expiry at the full TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::query::QueryKind;

/// TTL configuration, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Default TTL for items without a type-specific override.
    pub item_default_secs: u64,
    /// Per-item-type TTL overrides.
    #[serde(default)]
    pub item_by_type: HashMap<String, u64>,
    /// TTL for complete query results.
    pub query_complete_secs: u64,
    /// TTL for faceted / partial query results.
    pub query_faceted_secs: u64,
    /// Serve stale entries while a background refresh runs.
    pub stale_while_revalidate: bool,
    /// Fraction of the TTL after which an entry is stale; domain `[0, 1]`.
    pub staleness_threshold: f64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            item_default_secs: 300,
            item_by_type: HashMap::new(),
            query_complete_secs: 300,
            query_faceted_secs: 60,
            stale_while_revalidate: true,
            staleness_threshold: 0.8,
        }
    }
}

impl TtlConfig {
    pub fn sanitized(mut self) -> Self {
        if !self.staleness_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.staleness_threshold)
        {
            warn!(
                value = self.staleness_threshold,
                "staleness_threshold outside [0, 1], reset to 0.8"
            );
            self.staleness_threshold = 0.8;
        }
        self
    }
}

/// One named step of a TTL calculation, for the breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlAdjustment {
    pub name: String,
    pub before_secs: u64,
    pub after_secs: u64,
}

/// The outcome of a TTL calculation: the effective TTL, the base value it
/// started from, and the adjustments applied in order.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlCalculation {
    pub ttl: Duration,
    pub base_ttl: Duration,
    pub adjustments: Vec<TtlAdjustment>,
}

/// A structured calculation breakdown for debugging, including the
/// classification thresholds in force.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlExplanation {
    pub calculation: TtlCalculation,
    pub staleness_threshold: f64,
    pub stale_while_revalidate: bool,
}

/// Freshness of a cached entry at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Past the staleness threshold but not yet expired; serveable while a
    /// refresh runs.
    Stale,
    Expired,
}

#[derive(Debug, Clone)]
pub struct TtlEngine {
    config: TtlConfig,
}

impl TtlEngine {
    pub fn new(config: TtlConfig) -> Self {
        Self {
            config: config.sanitized(),
        }
    }

    pub fn config(&self) -> &TtlConfig {
        &self.config
    }

    /// Effective TTL for an item of the given type: the per-type override
    /// when one exists, the item default otherwise.
    pub fn calculate_item_ttl(&self, item_type: &str) -> TtlCalculation {
        let base = self.config.item_default_secs;
        let mut adjustments = Vec::new();
        let effective = match self.config.item_by_type.get(item_type) {
            Some(&by_type) => {
                adjustments.push(TtlAdjustment {
                    name: format!("type-override:{item_type}"),
                    before_secs: base,
                    after_secs: by_type,
                });
                by_type
            }
            None => base,
        };
        TtlCalculation {
            ttl: Duration::from_secs(effective),
            base_ttl: Duration::from_secs(base),
            adjustments,
        }
    }

    /// Effective TTL for a query result. Faceted kinds and partial results
    /// get the shorter faceted TTL; complete results the complete TTL.
    pub fn calculate_query_ttl(&self, kind: &QueryKind, is_complete: bool) -> TtlCalculation {
        let base = self.config.query_complete_secs;
        let mut adjustments = Vec::new();
        let effective = if kind.is_faceted() || !is_complete {
            adjustments.push(TtlAdjustment {
                name: if kind.is_faceted() {
                    format!("faceted:{kind}")
                } else {
                    "partial-result".to_string()
                },
                before_secs: base,
                after_secs: self.config.query_faceted_secs,
            });
            self.config.query_faceted_secs
        } else {
            base
        };
        TtlCalculation {
            ttl: Duration::from_secs(effective),
            base_ttl: Duration::from_secs(base),
            adjustments,
        }
    }

    /// `true` once `now >= created_at + ttl`. Monotone in time.
    pub fn is_expired(&self, created_at: Instant, ttl: Duration) -> bool {
        created_at.elapsed() >= ttl
    }

    /// `true` while the entry is past the staleness threshold but not yet
    /// expired. Always `false` when stale-while-revalidate is off.
    pub fn is_stale(&self, created_at: Instant, ttl: Duration) -> bool {
        if !self.config.stale_while_revalidate {
            return false;
        }
        let stale_after = ttl.mul_f64(self.config.staleness_threshold);
        created_at.elapsed() >= stale_after && !self.is_expired(created_at, ttl)
    }

    pub fn classify(&self, created_at: Instant, ttl: Duration) -> Freshness {
        if self.is_expired(created_at, ttl) {
            Freshness::Expired
        } else if self.is_stale(created_at, ttl) {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    /// Structured breakdown of an item TTL calculation for debugging.
    pub fn explain_item_ttl(&self, item_type: &str) -> TtlExplanation {
        TtlExplanation {
            calculation: self.calculate_item_ttl(item_type),
            staleness_threshold: self.config.staleness_threshold,
            stale_while_revalidate: self.config.stale_while_revalidate,
        }
    }

    /// Structured breakdown of a query TTL calculation for debugging.
    pub fn explain_query_ttl(&self, kind: &QueryKind, is_complete: bool) -> TtlExplanation {
        TtlExplanation {
            calculation: self.calculate_query_ttl(kind, is_complete),
            staleness_threshold: self.config.staleness_threshold,
            stale_while_revalidate: self.config.stale_while_revalidate,
        }
    }
}
