//! Cross-cutting error type shared across the authorization core's crates.
//!
//! Component-local errors (e.g. `CoreError` in `authorization-core`) convert
//! into this type at crate boundaries; this is the error taxonomy a host
//! application sees if it depends on `authority-types` directly (e.g. a
//! transport adapter implementing `KeyValueStore`).

use thiserror::Error;

/// Cross-cutting failure kinds that can surface from any authority-types
/// capability (clock, storage, HMAC).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("storage backend unavailable: {reason}")]
    StorageUnavailable { reason: String },

    #[error("serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("invalid caller identity")]
    InvalidIdentity,

    #[error("internal error: {0}")]
    Internal(String),
}
