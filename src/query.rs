//! Query fingerprinting.
//!
//! A query is identified by its entity type, its kind, its normalized
//! parameters and its normalized location coordinates. The fingerprint is
//! the hex SHA-256 of that canonical rendering, so semantically identical
//! queries hit the same cache slot regardless of parameter ordering.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::keys::LocationRef;

/// The kind of query being fingerprinted. Named facets and finders embed
/// their name so `facet:stats` and `facet:summary` never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKind {
    All,
    One,
    Facet(String),
    AllFacet(String),
    Find(String),
    FindOne(String),
}

impl QueryKind {
    /// The canonical label that enters the fingerprint.
    pub fn label(&self) -> String {
        match self {
            QueryKind::All => "all".to_string(),
            QueryKind::One => "one".to_string(),
            QueryKind::Facet(name) => format!("facet:{name}"),
            QueryKind::AllFacet(name) => format!("allFacet:{name}"),
            QueryKind::Find(name) => format!("find:{name}"),
            QueryKind::FindOne(name) => format!("findOne:{name}"),
        }
    }

    /// Faceted query kinds get the shorter faceted TTL.
    pub fn is_faceted(&self) -> bool {
        matches!(self, QueryKind::Facet(_) | QueryKind::AllFacet(_))
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A deterministic fingerprint of one query. Used as the key in the query
/// layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders a location list as a canonical path, used both inside the
/// fingerprint and as the prefix index for location-based invalidation.
/// Empty locations render as the empty string (a "root" query).
pub fn location_path(locations: &[LocationRef]) -> String {
    locations
        .iter()
        .map(|loc| format!("{}:{}", loc.kt, loc.lk.canonical()))
        .collect::<Vec<_>>()
        .join("/")
}

/// Produces deterministic, order-insensitive query fingerprints.
///
/// Normalization rules:
/// - object keys are ordered lexicographically (the default `serde_json`
///   map is BTree-backed, so canonical serialization gives this for free);
/// - RFC 3339-parseable string values are re-rendered as UTC ISO-8601 with
///   millisecond precision, so `2024-01-01T10:00:00+02:00` and
///   `2024-01-01T08:00:00Z` fingerprint identically;
/// - arrays under a field declared orderless are sorted by canonical
///   rendering; all other arrays preserve order.
///
/// # Examples
///
/// ```
/// use duocache::query::{QueryHasher, QueryKind};
/// use serde_json::json;
///
/// let hasher = QueryHasher::new().with_orderless_fields(["tags"]);
///
/// let a = hasher.fingerprint("user", &QueryKind::All, &json!({"tags": ["b", "a"]}), &[]);
/// let b = hasher.fingerprint("user", &QueryKind::All, &json!({"tags": ["a", "b"]}), &[]);
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryHasher {
    orderless_fields: BTreeSet<String>,
}

impl QueryHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares fields whose array values are order-insensitive.
    pub fn with_orderless_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.orderless_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Computes the fingerprint of `(kt, kind, params, locations)`.
    pub fn fingerprint(
        &self,
        kt: &str,
        kind: &QueryKind,
        params: &Value,
        locations: &[LocationRef],
    ) -> QueryFingerprint {
        let normalized = self.normalize(params, None);
        let canonical = format!(
            "{}|{}|{}|{}",
            kt,
            kind.label(),
            serde_json::to_string(&normalized).unwrap_or_default(),
            location_path(locations)
        );

        let digest = Sha256::digest(canonical.as_bytes());
        QueryFingerprint(hex::encode(digest))
    }

    fn normalize(&self, value: &Value, field: Option<&str>) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.normalize(v, Some(k.as_str()))))
                    .collect(),
            ),
            Value::Array(items) => {
                let mut normalized: Vec<Value> =
                    items.iter().map(|v| self.normalize(v, None)).collect();
                if field.is_some_and(|f| self.orderless_fields.contains(f)) {
                    normalized.sort_by_cached_key(|v| v.to_string());
                }
                Value::Array(normalized)
            }
            Value::String(s) => Value::String(canonicalize_timestamp(s)),
            other => other.clone(),
        }
    }
}

/// Re-renders an RFC 3339 timestamp in canonical UTC form; non-timestamp
/// strings pass through unchanged.
fn canonicalize_timestamp(s: &str) -> String {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        Err(_) => s.to_string(),
    }
}
