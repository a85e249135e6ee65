//! Engine-level error taxonomy (§7).
//!
//! Internal persistence failures are caught at the store boundary and
//! converted to `DependencyUnavailable` before they reach the engine, per
//! the propagation policy in §7.

use authority_types::{AuthorityError, KvStoreError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed pubkey/method/URL/content length. Not audited.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Unauthorized NIP-46 client, kill-switch active, or caller
    /// verification mismatch. Audited as automatic deny.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Per-client or global rate limit. Audited as automatic deny.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Hour/day/week velocity cap exceeded. Audited as automatic deny.
    #[error("velocity exceeded: {reason}, resets at {reset_at_ms}")]
    VelocityExceeded { reason: String, reset_at_ms: u64 },

    /// Approval registry full. Audited as automatic deny.
    #[error("capacity exhausted")]
    CapacityExhausted,

    /// Interactive approval did not resolve within the approval timeout.
    /// Audited as automatic deny.
    #[error("approval timed out")]
    Timeout,

    /// Interactive deny. Audited as interactive deny.
    #[error("user rejected the request")]
    UserRejected,

    /// Signer, permission store, or transport dependency missing. Not
    /// audited.
    #[error("dependency unavailable: {reason}")]
    DependencyUnavailable { reason: String },

    /// Audit chain verification failed. Surfaced to the operator; does not
    /// block new operations.
    #[error("audit chain integrity failure at entry {entry_id}")]
    IntegrityFailure { entry_id: String },
}

impl From<KvStoreError> for CoreError {
    fn from(err: KvStoreError) -> Self {
        CoreError::DependencyUnavailable {
            reason: err.to_string(),
        }
    }
}

impl From<AuthorityError> for CoreError {
    fn from(err: AuthorityError) -> Self {
        CoreError::DependencyUnavailable {
            reason: err.to_string(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
