//! Cache configuration and the size-string grammar.

use std::time::Duration;

use serde_json::Value;

use crate::error::CacheError;
use crate::eviction::EvictionConfig;
use crate::keys::LocationRef;
use crate::metadata::SizeLimits;
use crate::swr::SwrConfig;
use crate::ttl::TtlConfig;
use crate::warmer::WarmerConfig;

/// Parses a size string into bytes.
///
/// Grammar: an integer or decimal followed by an optional unit. Decimal
/// units are powers of 1000 (`kb`, `mb`, `gb`, `tb`), binary units powers
/// of 1024 (`kib`, `mib`, `gib`, `tib`), case-insensitive. A bare integer
/// is bytes.
///
/// # Examples
///
/// ```
/// use duocache::config::parse_size;
///
/// assert_eq!(parse_size("3kb").unwrap(), 3_000);
/// assert_eq!(parse_size("3KiB").unwrap(), 3_072);
/// assert_eq!(parse_size("2.5mb").unwrap(), 2_500_000);
/// assert_eq!(parse_size("512").unwrap(), 512);
/// assert!(parse_size("").is_err());
/// ```
pub fn parse_size(input: &str) -> Result<u64, CacheError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CacheError::InvalidSize("empty size string".into()));
    }

    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number_part, unit_part) = trimmed.split_at(split);
    let number_part = number_part.trim();
    let unit_part = unit_part.trim();

    let number: f64 = number_part
        .parse()
        .map_err(|_| CacheError::InvalidSize(format!("unparseable number in '{input}'")))?;
    if !number.is_finite() || number < 0.0 {
        return Err(CacheError::InvalidSize(format!(
            "size must be a non-negative finite number, got '{input}'"
        )));
    }

    let multiplier: u64 = match unit_part.to_ascii_lowercase().as_str() {
        "" | "b" => {
            // A bare value is bytes; fractional bytes do not exist.
            if unit_part.is_empty() && number.fract() != 0.0 {
                return Err(CacheError::InvalidSize(format!(
                    "fractional byte count '{input}'"
                )));
            }
            1
        }
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1u64 << 40,
        other => {
            return Err(CacheError::InvalidSize(format!(
                "unknown size unit '{other}' in '{input}'"
            )))
        }
    };

    Ok((number * multiplier as f64).round() as u64)
}

/// One configured warming query, turned into a warming operation when the
/// cache starts warming.
#[derive(Debug, Clone)]
pub struct WarmingQuery {
    /// Stable identifier; duplicate ids replace earlier registrations.
    pub id: String,
    /// Query parameters passed to `list`.
    pub params: Value,
    /// Location scope of the warmed query.
    pub locations: Vec<LocationRef>,
    /// Priority in `[1, 10]`, higher warms earlier.
    pub priority: u8,
    /// Optional TTL stretch for entries cached by this warming query.
    pub ttl_multiplier: Option<f64>,
}

/// Warming configuration: the master switch, cycle cadence, and the queries
/// to warm.
#[derive(Debug, Clone)]
pub struct WarmingSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub queries: Vec<WarmingQuery>,
    /// Cycle mechanics (batch concurrency, per-operation timeout).
    pub cycle: WarmerConfig,
}

impl Default for WarmingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(300),
            queries: Vec::new(),
            cycle: WarmerConfig::default(),
        }
    }
}

/// The full configuration surface of a cache instance.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// TTL defaults and staleness thresholds.
    pub ttl: TtlConfig,
    /// Eviction policy selection plus policy-specific settings.
    pub eviction: EvictionConfig,
    /// Entry-count bound; `None` is unbounded.
    pub max_items: Option<u64>,
    /// Byte bound; `None` is unbounded. See [`parse_size`] for the
    /// accepted string grammar.
    pub max_size_bytes: Option<u64>,
    /// Skip the cache entirely: every read is an upstream round-trip.
    pub bypass_cache: bool,
    /// Stale-while-revalidate refresh settings.
    pub swr: SwrConfig,
    /// Proactive warming settings.
    pub warming: WarmingSettings,
    /// Fields whose array values fingerprint order-insensitively.
    pub orderless_fields: Vec<String>,
}

impl CacheConfig {
    /// Sets the byte bound from a size string.
    pub fn with_max_size(mut self, size: &str) -> Result<Self, CacheError> {
        self.max_size_bytes = Some(parse_size(size)?);
        Ok(self)
    }

    pub fn with_max_items(mut self, max_items: u64) -> Self {
        self.max_items = Some(max_items);
        self
    }

    /// Clamps out-of-domain values, warning about each repair.
    pub fn sanitized(mut self) -> Self {
        self.ttl = self.ttl.sanitized();
        self.eviction = self.eviction.sanitized();
        // SWR enablement follows the TTL-level switch; a disabled
        // staleness window with an enabled coordinator would never fire.
        self.swr.enabled = self.swr.enabled && self.ttl.stale_while_revalidate;
        self
    }

    /// Rejects configurations still broken after sanitization.
    pub fn validate(&self) -> Result<(), CacheError> {
        self.eviction.validate()
    }

    pub fn size_limits(&self) -> SizeLimits {
        SizeLimits {
            max_items: self.max_items,
            max_size_bytes: self.max_size_bytes,
        }
    }
}
