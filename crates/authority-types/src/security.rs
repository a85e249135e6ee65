//! HMAC-SHA256 helpers shared by the audit chain and the caller-verifier
//! nonce layer.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes HMAC-SHA256(key, message) and returns it hex-encoded.
///
/// Used both for `AuditEntry::entry_hash` (message is the pipe-joined field
/// tuple from §3) and, via [`constant_time_eq`], to compare signing-cert
/// hashes in the Caller Verifier's TOFU check.
pub fn hmac_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time equality for hash/signature comparison (audit chain
/// verification, signing-certificate equality).
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle_eq::ConstantTimeEq;
    a.as_bytes().ct_eq(b.as_bytes())
}

/// Minimal constant-time byte comparison, avoiding a dependency (`subtle`)
/// for a single trait. Kept private behind `constant_time_eq`.
mod subtle_eq {
    pub trait ConstantTimeEq {
        fn ct_eq(&self, other: &Self) -> bool;
    }

    impl ConstantTimeEq for [u8] {
        fn ct_eq(&self, other: &Self) -> bool {
            if self.len() != other.len() {
                return false;
            }
            let mut diff = 0u8;
            for (x, y) in self.iter().zip(other.iter()) {
                diff |= x ^ y;
            }
            diff == 0
        }
    }
}

/// Generates a cryptographically random 32-byte value, hex-encoded. Used
/// for HMAC key provisioning and nonce issuance.
pub fn random_hex_32() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic_for_same_key_and_message() {
        let a = hmac_hex(b"key", b"message");
        let b = hmac_hex(b"key", b"message");
        assert_eq!(a, b);
    }

    #[test]
    fn hmac_changes_with_message() {
        let a = hmac_hex(b"key", b"message-1");
        let b = hmac_hex(b"key", b"message-2");
        assert_ne!(a, b);
    }

    #[test]
    fn constant_time_eq_matches_and_mismatches() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn random_hex_32_has_expected_length() {
        let nonce = random_hex_32();
        assert_eq!(nonce.len(), 64);
    }
}
