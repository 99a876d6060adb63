use thiserror::Error;

/// Failures reported by an [`crate::ItemApi`](crate::api::ItemApi) implementation.
///
/// The cache core never constructs these itself; it translates and propagates
/// them according to the operation being performed (`NotFound` on a `get`
/// becomes a `None` return, on an `update` it is passed through, and so on).
///
/// All variants are `Clone` so that a single failed upstream call can be
/// observed by every caller coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The upstream signalled that the requested item does not exist.
    #[error("item not found")]
    NotFound,

    /// The request never reached the upstream, or the connection dropped.
    #[error("network error: {0}")]
    Network(String),

    /// The upstream received the request but failed to serve it.
    #[error("server error: {0}")]
    Server(String),
}

/// The error type for all fallible cache operations.
///
/// # Examples
///
/// ```
/// use duocache::{CacheError, EntityKey};
///
/// let err = duocache::keys::hash_key(&EntityKey::new("", "u1")).unwrap_err();
/// assert!(matches!(err, CacheError::InvalidKey(_)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A key had an empty or malformed component. Never swallowed; always
    /// surfaced to the caller.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A size string did not match the `<number><unit>` grammar.
    #[error("invalid size: {0}")]
    InvalidSize(String),

    /// Configuration failed validation after sanitization.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An upstream API failure, propagated as-is.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A background refresh exceeded its configured timeout.
    #[error("refresh timed out")]
    RefreshTimeout,

    /// An eviction strategy failed internally. Contained by the engine
    /// (logged, no eviction performed); only surfaced through logs.
    #[error("eviction strategy failure: {0}")]
    Eviction(String),
}

impl CacheError {
    /// Returns `true` when the error is an upstream `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Api(ApiError::NotFound))
    }
}
