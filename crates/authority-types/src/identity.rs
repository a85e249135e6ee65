//! Caller identity: the one value every permission, audit entry, and
//! rate-limit bucket is keyed by.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The counterparty invoking an operation against the authorization core.
///
/// A `LocalPackage` is an OS-installed application identified by its package
/// name and the hash of its signing certificate (see `CallerVerifier`). A
/// `Nip46Client` is a remote bunker client identified solely by its 32-byte
/// Nostr public key; it carries no OS-level identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallerIdentity {
    LocalPackage {
        name: String,
        signature_hash: String,
    },
    Nip46Client {
        /// Lower-case 64-hex-char pubkey.
        pubkey: String,
    },
}

impl CallerIdentity {
    pub fn local(name: impl Into<String>, signature_hash: impl Into<String>) -> Self {
        Self::LocalPackage {
            name: name.into(),
            signature_hash: signature_hash.into(),
        }
    }

    /// `pubkey` is lower-cased on construction; callers must already have
    /// validated it matches `^[0-9a-f]{64}$` upstream.
    pub fn nip46(pubkey: impl Into<String>) -> Self {
        Self::Nip46Client {
            pubkey: pubkey.into().to_lowercase(),
        }
    }

    /// The canonical string form every component keys state by: local
    /// packages as their bare name, NIP-46 clients as `"nip46:" + pubkey`.
    pub fn canonical(&self) -> String {
        match self {
            Self::LocalPackage { name, .. } => name.clone(),
            Self::Nip46Client { pubkey } => format!("nip46:{pubkey}"),
        }
    }

    pub fn is_nip46(&self) -> bool {
        matches!(self, Self::Nip46Client { .. })
    }

    pub fn nip46_pubkey(&self) -> Option<&str> {
        match self {
            Self::Nip46Client { pubkey } => Some(pubkey),
            _ => None,
        }
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}
