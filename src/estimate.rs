//! Size estimation for cached values.
//!
//! The item layer tracks an estimated byte size per entry so byte-based
//! limits can drive eviction. Estimation is a pluggable collaborator: the
//! contract is a non-negative byte estimate, O(value-size) in the worst
//! case, and no panics on values it cannot inspect.

use serde::Serialize;

/// The constant returned when a value cannot be estimated (for example a
/// value whose serialization fails). Keeps byte accounting running instead
/// of erroring the whole write path.
pub const FALLBACK_ESTIMATE_BYTES: u64 = 64;

/// Estimates the in-memory footprint of a cached value in bytes.
pub trait SizeEstimator<V>: Send + Sync {
    /// Returns a non-negative byte estimate for `value`.
    fn estimate(&self, value: &V) -> u64;
}

/// The default estimator: serialized JSON length.
///
/// Serialization length is a stable proxy for payload size that needs no
/// per-type bookkeeping. Values that fail to serialize fall back to
/// [`FALLBACK_ESTIMATE_BYTES`].
///
/// # Examples
///
/// ```
/// use duocache::estimate::{JsonSizeEstimator, SizeEstimator};
///
/// let estimator = JsonSizeEstimator;
/// assert_eq!(estimator.estimate(&42u32), 2);
/// assert_eq!(estimator.estimate(&"abcd"), 6); // quotes included
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSizeEstimator;

impl<V: Serialize> SizeEstimator<V> for JsonSizeEstimator {
    fn estimate(&self, value: &V) -> u64 {
        match serde_json::to_vec(value) {
            Ok(bytes) => bytes.len() as u64,
            Err(err) => {
                tracing::debug!(error = %err, "size estimation fell back to constant");
                FALLBACK_ESTIMATE_BYTES
            }
        }
    }
}

/// An estimator that reports the same size for every value. Useful in tests
/// and for workloads where only the entry count matters.
#[derive(Debug, Clone, Copy)]
pub struct FixedSizeEstimator(pub u64);

impl<V> SizeEstimator<V> for FixedSizeEstimator {
    fn estimate(&self, _value: &V) -> u64 {
        self.0
    }
}
