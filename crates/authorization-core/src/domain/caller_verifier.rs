//! Caller Verifier (§4.6): trust-on-first-use signature-hash verification
//! for local callers, plus single-use nonce issuance. The signature hash
//! itself is read from the OS by the port layer, never by the domain --
//! this module only compares and persists what it is given.

use authority_types::{constant_time_eq, random_hex_32, Clock, KeyValueStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::errors::CoreResult;

const NONCE_TTL: std::time::Duration = std::time::Duration::from_secs(5 * 60);
const MAX_TRACKED_NONCES: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyResult {
    Verified,
    FirstUseRequiresApproval,
    SignatureMismatch,
    NotInstalled,
}

fn trust_key(package: &str) -> Vec<u8> {
    format!("trust:{package}").into_bytes()
}

/// TOFU signature-hash verification for local callers.
pub struct CallerVerifier {
    store: Arc<dyn KeyValueStore>,
}

impl CallerVerifier {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// `observed_signature_hash` is supplied by the port layer, which reads
    /// it from the OS package manager; `None` means the package is not
    /// installed.
    pub fn verify_or_trust(
        &self,
        package: &str,
        observed_signature_hash: Option<&str>,
    ) -> CoreResult<VerifyResult> {
        let Some(observed) = observed_signature_hash else {
            return Ok(VerifyResult::NotInstalled);
        };
        let key = trust_key(package);
        let Some(stored) = self.store.get(&key)? else {
            return Ok(VerifyResult::FirstUseRequiresApproval);
        };
        let stored_hash = String::from_utf8_lossy(&stored).into_owned();
        if constant_time_eq(&stored_hash, observed) {
            Ok(VerifyResult::Verified)
        } else {
            Ok(VerifyResult::SignatureMismatch)
        }
    }

    /// Persists `signature_hash` as the trusted hash for `package`. Only
    /// called after an explicit user acknowledgement of a
    /// `FirstUseRequiresApproval` result (§4.6).
    pub fn confirm_trust(&self, package: &str, signature_hash: &str) -> CoreResult<()> {
        self.store.put(&trust_key(package), signature_hash.as_bytes())?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NonceOutcome {
    Valid(String),
    Invalid,
    Expired,
}

struct NonceRecord {
    caller: String,
    expires_at: Instant,
}

/// Single-use nonces for NIP-46 connect handshakes. In-process only (§3);
/// discarded at shutdown like the rate limiter.
pub struct NonceStore {
    nonces: parking_lot::Mutex<HashMap<String, NonceRecord>>,
    clock: Arc<dyn Clock>,
}

impl NonceStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            nonces: parking_lot::Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn issue(&self, caller: &str) -> String {
        let nonce = random_hex_32();
        let now = self.clock.monotonic();
        let mut nonces = self.nonces.lock();
        self.evict_if_needed(&mut nonces, now);
        nonces.insert(
            nonce.clone(),
            NonceRecord {
                caller: caller.to_string(),
                expires_at: now + NONCE_TTL,
            },
        );
        nonce
    }

    /// Atomic remove-on-read: a nonce can be consumed exactly once.
    pub fn consume(&self, nonce: &str) -> NonceOutcome {
        let now = self.clock.monotonic();
        let mut nonces = self.nonces.lock();
        match nonces.remove(nonce) {
            None => NonceOutcome::Invalid,
            Some(record) if record.expires_at <= now => NonceOutcome::Expired,
            Some(record) => NonceOutcome::Valid(record.caller),
        }
    }

    fn evict_if_needed(&self, nonces: &mut HashMap<String, NonceRecord>, now: Instant) {
        if nonces.len() < MAX_TRACKED_NONCES {
            return;
        }
        nonces.retain(|_, record| record.expires_at > now);
        if nonces.len() >= MAX_TRACKED_NONCES {
            if let Some(oldest) = nonces
                .iter()
                .min_by_key(|(_, r)| r.expires_at)
                .map(|(k, _)| k.clone())
            {
                nonces.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authority_types::{InMemoryKvStore, SystemClock};

    #[test]
    fn not_installed_when_no_observed_hash() {
        let verifier = CallerVerifier::new(Arc::new(InMemoryKvStore::new()));
        assert_eq!(
            verifier.verify_or_trust("pkg", None).unwrap(),
            VerifyResult::NotInstalled
        );
    }

    #[test]
    fn first_contact_requires_approval_and_does_not_auto_trust() {
        let verifier = CallerVerifier::new(Arc::new(InMemoryKvStore::new()));
        assert_eq!(
            verifier.verify_or_trust("pkg", Some("hash-a")).unwrap(),
            VerifyResult::FirstUseRequiresApproval
        );
        // Still not trusted until explicitly confirmed.
        assert_eq!(
            verifier.verify_or_trust("pkg", Some("hash-a")).unwrap(),
            VerifyResult::FirstUseRequiresApproval
        );
    }

    #[test]
    fn confirmed_trust_then_matching_hash_verifies() {
        let verifier = CallerVerifier::new(Arc::new(InMemoryKvStore::new()));
        verifier.confirm_trust("pkg", "hash-a").unwrap();
        assert_eq!(
            verifier.verify_or_trust("pkg", Some("hash-a")).unwrap(),
            VerifyResult::Verified
        );
    }

    #[test]
    fn mismatched_hash_after_trust_is_rejected() {
        let verifier = CallerVerifier::new(Arc::new(InMemoryKvStore::new()));
        verifier.confirm_trust("pkg", "hash-a").unwrap();
        assert_eq!(
            verifier.verify_or_trust("pkg", Some("hash-b")).unwrap(),
            VerifyResult::SignatureMismatch
        );
    }

    #[test]
    fn nonce_consume_twice_is_valid_then_invalid() {
        let store = NonceStore::new(Arc::new(SystemClock));
        let nonce = store.issue("pkg");
        assert_eq!(store.consume(&nonce), NonceOutcome::Valid("pkg".to_string()));
        assert_eq!(store.consume(&nonce), NonceOutcome::Invalid);
    }

    #[test]
    fn expired_nonce_is_reported_expired() {
        use authority_types::MockClock;
        let clock = Arc::new(MockClock::new(0));
        let store = NonceStore::new(clock.clone() as Arc<dyn Clock>);
        let nonce = store.issue("pkg");
        clock.advance(5 * 60 * 1000 + 1);
        assert_eq!(store.consume(&nonce), NonceOutcome::Expired);
    }
}
