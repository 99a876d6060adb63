//! Entity keys and canonical key hashing.
//!
//! Every entity is addressed by a type tag plus a primary token, optionally
//! qualified by up to five ordered location coordinates. Two keys are equal
//! iff their stringified forms are equal, so `Int(123)` and `Str("123")`
//! deliberately collide. The canonical rendering ([`KeyHash`]) is the string
//! used as the map key throughout the cache.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// The maximum number of location coordinates a composite key may carry.
pub const MAX_LOCATIONS: usize = 5;

/// A primary or location token: a string or an integer.
///
/// Equality and hashing operate on the stringified form, so a numeric token
/// and its decimal string rendering are the same key.
///
/// # Examples
///
/// ```
/// use duocache::KeyToken;
///
/// assert_eq!(KeyToken::from(123), KeyToken::from("123"));
/// assert_ne!(KeyToken::from(123), KeyToken::from("0123"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyToken {
    Str(String),
    Int(i64),
}

impl KeyToken {
    /// Returns the canonical string form used for hashing and equality.
    pub fn canonical(&self) -> Cow<'_, str> {
        match self {
            KeyToken::Str(s) => Cow::Borrowed(s.as_str()),
            KeyToken::Int(n) => Cow::Owned(n.to_string()),
        }
    }

    /// Returns `true` when the canonical form is empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        match self {
            KeyToken::Str(s) => s.trim().is_empty(),
            KeyToken::Int(_) => false,
        }
    }
}

impl PartialEq for KeyToken {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for KeyToken {}

impl Hash for KeyToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for KeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for KeyToken {
    fn from(s: &str) -> Self {
        KeyToken::Str(s.to_string())
    }
}

impl From<String> for KeyToken {
    fn from(s: String) -> Self {
        KeyToken::Str(s)
    }
}

impl From<i64> for KeyToken {
    fn from(n: i64) -> Self {
        KeyToken::Int(n)
    }
}

impl From<i32> for KeyToken {
    fn from(n: i32) -> Self {
        KeyToken::Int(n as i64)
    }
}

/// One location coordinate of a composite key: a `(kt, lk)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationRef {
    /// Type tag of the location.
    pub kt: String,
    /// Location token.
    pub lk: KeyToken,
}

impl LocationRef {
    pub fn new(kt: impl Into<String>, lk: impl Into<KeyToken>) -> Self {
        Self {
            kt: kt.into(),
            lk: lk.into(),
        }
    }
}

/// The full key of an entity: type tag, primary token, and an ordered list
/// of location coordinates (empty for a primary-only key).
///
/// # Examples
///
/// ```
/// use duocache::{EntityKey, LocationRef};
///
/// let primary = EntityKey::new("user", "u1");
/// let composite = EntityKey::new("task", 42)
///     .with_locations(vec![LocationRef::new("project", "p9")]);
///
/// assert_eq!(duocache::keys::hash_key(&primary).unwrap().as_str(), "user:u1");
/// assert_eq!(
///     duocache::keys::hash_key(&composite).unwrap().as_str(),
///     "task:42:project:p9"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type tag.
    pub kt: String,
    /// Primary token.
    pub pk: KeyToken,
    /// Ordered location coordinates, outermost first.
    #[serde(default)]
    pub locations: Vec<LocationRef>,
}

impl EntityKey {
    pub fn new(kt: impl Into<String>, pk: impl Into<KeyToken>) -> Self {
        Self {
            kt: kt.into(),
            pk: pk.into(),
            locations: Vec::new(),
        }
    }

    pub fn with_locations(mut self, locations: Vec<LocationRef>) -> Self {
        self.locations = locations;
        self
    }

    /// Returns `true` when the key carries location coordinates.
    pub fn is_composite(&self) -> bool {
        !self.locations.is_empty()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kt, self.pk)?;
        for loc in &self.locations {
            write!(f, ":{}:{}", loc.kt, loc.lk)?;
        }
        Ok(())
    }
}

/// The canonical string rendering of an [`EntityKey`], used as the map key in
/// the item layer, the eviction metadata, the in-flight registries and the
/// query-result key lists.
///
/// Constructed only through [`hash_key`], which validates the key first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyHash(String);

impl KeyHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces the canonical hash of a key: `kt:pk` for a primary key,
/// `kt:pk:lkt1:lk1:...` for a composite key.
///
/// The round-trip property holds: two keys hash to the same string iff they
/// are semantically equal (equal type tag, equal stringified primary token,
/// pairwise-equal location list).
///
/// # Errors
///
/// Returns [`CacheError::InvalidKey`] when the type tag or any token is
/// empty or whitespace-only, or when more than [`MAX_LOCATIONS`] coordinates
/// are present.
pub fn hash_key(key: &EntityKey) -> Result<KeyHash, CacheError> {
    validate_key(key)?;

    let mut rendered = format!("{}:{}", key.kt, key.pk.canonical());
    for loc in &key.locations {
        rendered.push(':');
        rendered.push_str(&loc.kt);
        rendered.push(':');
        rendered.push_str(&loc.lk.canonical());
    }
    Ok(KeyHash(rendered))
}

fn validate_key(key: &EntityKey) -> Result<(), CacheError> {
    if key.kt.trim().is_empty() {
        return Err(CacheError::InvalidKey("empty key type".into()));
    }
    if key.pk.is_blank() {
        return Err(CacheError::InvalidKey(format!(
            "empty primary token for key type '{}'",
            key.kt
        )));
    }
    if key.locations.len() > MAX_LOCATIONS {
        return Err(CacheError::InvalidKey(format!(
            "key '{}:{}' carries {} location coordinates (max {})",
            key.kt,
            key.pk,
            key.locations.len(),
            MAX_LOCATIONS
        )));
    }
    for loc in &key.locations {
        if loc.kt.trim().is_empty() {
            return Err(CacheError::InvalidKey(format!(
                "empty location type in key '{}:{}'",
                key.kt, key.pk
            )));
        }
        if loc.lk.is_blank() {
            return Err(CacheError::InvalidKey(format!(
                "empty location token for location type '{}'",
                loc.kt
            )));
        }
    }
    Ok(())
}
