//! Eviction policy selection and per-policy configuration.
//!
//! Configuration goes through two passes before a strategy is constructed:
//! `sanitized()` clamps out-of-domain values to their nearest legal value
//! and warns, then `validate()` rejects anything still broken (NaN,
//! non-finite). Numeric domains: `decay_factor` in `[0, 1]`, `sketch_width`
//! in `[16, 65536]`, `sketch_depth` in `[1, 16]`, `adaptive_learning_rate`
//! in `[0, 10]`, all intervals positive.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CacheError;

/// Which eviction policy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicyKind {
    #[default]
    Lru,
    Lfu,
    Fifo,
    Mru,
    Random,
    Arc,
    #[serde(rename = "2q")]
    TwoQ,
}

impl EvictionPolicyKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicyKind::Lru => "lru",
            EvictionPolicyKind::Lfu => "lfu",
            EvictionPolicyKind::Fifo => "fifo",
            EvictionPolicyKind::Mru => "mru",
            EvictionPolicyKind::Random => "random",
            EvictionPolicyKind::Arc => "arc",
            EvictionPolicyKind::TwoQ => "2q",
        }
    }
}

impl fmt::Display for EvictionPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive policy-name parsing; unrecognized names fall back to LRU
/// with a warning.
impl From<&str> for EvictionPolicyKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "lru" => EvictionPolicyKind::Lru,
            "lfu" => EvictionPolicyKind::Lfu,
            "fifo" => EvictionPolicyKind::Fifo,
            "mru" => EvictionPolicyKind::Mru,
            "random" => EvictionPolicyKind::Random,
            "arc" => EvictionPolicyKind::Arc,
            "2q" | "twoq" => EvictionPolicyKind::TwoQ,
            other => {
                warn!(policy = other, "unknown eviction policy, falling back to lru");
                EvictionPolicyKind::Lru
            }
        }
    }
}

/// LFU policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LfuConfig {
    /// Track frequencies in a Count-Min Sketch instead of exact per-key
    /// counters. Memory becomes O(width x depth), independent of key count.
    pub use_probabilistic_counting: bool,
    /// Sketch width; domain `[16, 65536]`.
    pub sketch_width: usize,
    /// Sketch depth; domain `[1, 16]`.
    pub sketch_depth: usize,
    /// Multiplicative decay applied every `decay_interval_ms`; domain `[0, 1]`.
    pub decay_factor: f64,
    /// Decay cadence in milliseconds; must be positive.
    pub decay_interval_ms: u64,
}

impl Default for LfuConfig {
    fn default() -> Self {
        Self {
            use_probabilistic_counting: false,
            sketch_width: 1024,
            sketch_depth: 4,
            decay_factor: 0.1,
            decay_interval_ms: 60_000,
        }
    }
}

impl LfuConfig {
    pub fn sanitized(mut self) -> Self {
        self.decay_factor = clamp_unit("lfu.decay_factor", self.decay_factor);
        self.sketch_width = clamp_usize("lfu.sketch_width", self.sketch_width, 16, 65_536);
        self.sketch_depth = clamp_usize("lfu.sketch_depth", self.sketch_depth, 1, 16);
        self.decay_interval_ms =
            positive_interval("lfu.decay_interval_ms", self.decay_interval_ms, 60_000);
        self
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        require_finite_unit("lfu.decay_factor", self.decay_factor)?;
        if !(16..=65_536).contains(&self.sketch_width) {
            return Err(CacheError::InvalidConfig(format!(
                "lfu.sketch_width {} outside [16, 65536]",
                self.sketch_width
            )));
        }
        if !(1..=16).contains(&self.sketch_depth) {
            return Err(CacheError::InvalidConfig(format!(
                "lfu.sketch_depth {} outside [1, 16]",
                self.sketch_depth
            )));
        }
        if self.decay_interval_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "lfu.decay_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// ARC policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcConfig {
    /// Bound on each ghost list and on `target_recent_size`. Falls back to
    /// the engine's `max_items` limit when that is configured.
    pub max_cache_size: usize,
    /// Enhanced classification: an item belongs to the frequent list once
    /// its effective frequency reaches this threshold.
    pub frequency_threshold: f64,
    /// How far a ghost hit moves `target_recent_size`; domain `[0, 10]`.
    pub adaptive_learning_rate: f64,
    /// When false, classification reverts to the traditional
    /// `access_count > 1` rule.
    pub use_enhanced_frequency: bool,
    /// Score-based victim selection within each list instead of plain LRU.
    pub use_frequency_weighted_selection: bool,
    /// Apply multiplicative decay to frequency scores.
    pub enable_frequency_decay: bool,
    /// Decay cadence in milliseconds; must be positive.
    pub frequency_decay_interval_ms: u64,
    /// Per-cycle decay fraction; domain `[0, 1]`, applied decay capped at 0.9.
    pub decay_factor: f64,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 1000,
            frequency_threshold: 2.0,
            adaptive_learning_rate: 1.0,
            use_enhanced_frequency: true,
            use_frequency_weighted_selection: false,
            enable_frequency_decay: true,
            frequency_decay_interval_ms: 600_000,
            decay_factor: 0.1,
        }
    }
}

impl ArcConfig {
    pub fn sanitized(mut self) -> Self {
        self.decay_factor = clamp_unit("arc.decay_factor", self.decay_factor);
        self.adaptive_learning_rate = clamp_f64(
            "arc.adaptive_learning_rate",
            self.adaptive_learning_rate,
            0.0,
            10.0,
        );
        self.frequency_decay_interval_ms = positive_interval(
            "arc.frequency_decay_interval_ms",
            self.frequency_decay_interval_ms,
            600_000,
        );
        if self.max_cache_size == 0 {
            warn!("arc.max_cache_size of 0 raised to 1");
            self.max_cache_size = 1;
        }
        if self.frequency_threshold < 1.0 || !self.frequency_threshold.is_finite() {
            warn!(
                value = self.frequency_threshold,
                "arc.frequency_threshold below 1, clamped"
            );
            self.frequency_threshold = 1.0;
        }
        self
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        require_finite_unit("arc.decay_factor", self.decay_factor)?;
        if !self.adaptive_learning_rate.is_finite()
            || !(0.0..=10.0).contains(&self.adaptive_learning_rate)
        {
            return Err(CacheError::InvalidConfig(format!(
                "arc.adaptive_learning_rate {} outside [0, 10]",
                self.adaptive_learning_rate
            )));
        }
        if self.frequency_decay_interval_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "arc.frequency_decay_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// 2Q policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoQConfig {
    /// Bound on the ghost queue and basis for the admission share.
    pub max_cache_size: usize,
    /// When false, any access of an admission-queue member promotes it
    /// immediately (traditional 2Q).
    pub use_frequency_promotion: bool,
    /// Effective frequency needed for promotion when frequency promotion is
    /// on.
    pub promotion_threshold: f64,
    /// Fraction of capacity reserved for the admission queue; domain `(0, 1)`.
    pub admission_ratio: f64,
    /// Score-based victim selection in the hot queue instead of plain LRU.
    pub use_frequency_weighted_selection: bool,
    /// Apply multiplicative decay to hot-queue frequency scores.
    pub enable_frequency_decay: bool,
    /// Decay cadence in milliseconds; must be positive.
    pub frequency_decay_interval_ms: u64,
    /// Per-cycle decay fraction; domain `[0, 1]`.
    pub decay_factor: f64,
}

impl Default for TwoQConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 1000,
            use_frequency_promotion: true,
            promotion_threshold: 2.0,
            admission_ratio: 0.25,
            use_frequency_weighted_selection: false,
            enable_frequency_decay: true,
            frequency_decay_interval_ms: 600_000,
            decay_factor: 0.1,
        }
    }
}

impl TwoQConfig {
    pub fn sanitized(mut self) -> Self {
        self.decay_factor = clamp_unit("2q.decay_factor", self.decay_factor);
        self.frequency_decay_interval_ms = positive_interval(
            "2q.frequency_decay_interval_ms",
            self.frequency_decay_interval_ms,
            600_000,
        );
        if self.max_cache_size == 0 {
            warn!("2q.max_cache_size of 0 raised to 1");
            self.max_cache_size = 1;
        }
        if !self.admission_ratio.is_finite()
            || self.admission_ratio <= 0.0
            || self.admission_ratio >= 1.0
        {
            warn!(
                value = self.admission_ratio,
                "2q.admission_ratio outside (0, 1), reset to 0.25"
            );
            self.admission_ratio = 0.25;
        }
        if self.promotion_threshold < 1.0 || !self.promotion_threshold.is_finite() {
            warn!(
                value = self.promotion_threshold,
                "2q.promotion_threshold below 1, clamped"
            );
            self.promotion_threshold = 1.0;
        }
        self
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        require_finite_unit("2q.decay_factor", self.decay_factor)?;
        if self.frequency_decay_interval_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "2q.frequency_decay_interval_ms must be positive".into(),
            ));
        }
        if !(self.admission_ratio > 0.0 && self.admission_ratio < 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "2q.admission_ratio {} outside (0, 1)",
                self.admission_ratio
            )));
        }
        Ok(())
    }
}

/// Combined eviction configuration: the selected policy kind plus the
/// per-policy settings (only the selected policy's block is consulted).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvictionConfig {
    pub kind: EvictionPolicyKind,
    #[serde(default)]
    pub lfu: LfuConfig,
    #[serde(default)]
    pub arc: ArcConfig,
    #[serde(default)]
    pub two_q: TwoQConfig,
}

impl EvictionConfig {
    pub fn with_kind(kind: EvictionPolicyKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn sanitized(mut self) -> Self {
        self.lfu = self.lfu.sanitized();
        self.arc = self.arc.sanitized();
        self.two_q = self.two_q.sanitized();
        self
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        self.lfu.validate()?;
        self.arc.validate()?;
        self.two_q.validate()
    }
}

fn clamp_unit(field: &str, value: f64) -> f64 {
    if value.is_nan() {
        // validate() rejects NaN; clamping cannot repair it
        return value;
    }
    if value < 0.0 {
        warn!(field, value, "value below 0, clamped to 0");
        0.0
    } else if value > 1.0 {
        warn!(field, value, "value above 1, clamped to 1");
        1.0
    } else {
        value
    }
}

fn clamp_f64(field: &str, value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return value;
    }
    if value < min {
        warn!(field, value, min, "value below minimum, clamped");
        min
    } else if value > max {
        warn!(field, value, max, "value above maximum, clamped");
        max
    } else {
        value
    }
}

fn clamp_usize(field: &str, value: usize, min: usize, max: usize) -> usize {
    if value < min {
        warn!(field, value, min, "value below minimum, clamped");
        min
    } else if value > max {
        warn!(field, value, max, "value above maximum, clamped");
        max
    } else {
        value
    }
}

fn positive_interval(field: &str, value: u64, default: u64) -> u64 {
    if value == 0 {
        warn!(field, default, "interval must be positive, reset to default");
        default
    } else {
        value
    }
}

fn require_finite_unit(field: &str, value: f64) -> Result<(), CacheError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(CacheError::InvalidConfig(format!(
            "{field} {value} outside [0, 1]"
        )));
    }
    Ok(())
}
