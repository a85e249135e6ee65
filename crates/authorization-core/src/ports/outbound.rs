//! Capabilities the core borrows but never owns (§3 Ownership): the
//! cryptographic signer, the NIP-46 relay transport, and the interactive
//! approval consumer. The core invokes each of these exclusively through
//! the trait boundary below.

use async_trait::async_trait;

use crate::domain::approval::PendingApproval;
use crate::domain::errors::CoreError;
use crate::domain::nip46::NostrConnectRequest;

/// The cryptographic signer. Deliberately out of scope (§1): Nostr event
/// signing and NIP-04/44 primitives live entirely behind this trait.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn get_public_key(&self) -> Result<String, CoreError>;
    async fn sign_event(&self, event_json: &[u8]) -> Result<String, CoreError>;
    async fn nip04_encrypt(&self, peer_pubkey: &str, plaintext: &[u8]) -> Result<String, CoreError>;
    async fn nip04_decrypt(&self, peer_pubkey: &str, ciphertext: &[u8]) -> Result<String, CoreError>;
    async fn nip44_encrypt(&self, peer_pubkey: &str, plaintext: &[u8]) -> Result<String, CoreError>;
    async fn nip44_decrypt(&self, peer_pubkey: &str, ciphertext: &[u8]) -> Result<String, CoreError>;
    async fn decrypt_zap_event(&self, event_json: &[u8]) -> Result<String, CoreError>;
}

/// The relay transport for NIP-46 "bunker" traffic. `capability_available`
/// lets the core branch on a missing optional method at compile-known
/// `None` rather than probing the transport at runtime (§9 redesign flag).
#[async_trait]
pub trait BunkerHandler: Send + Sync {
    fn capability_available(&self) -> bool;
    async fn send_connect_response(&self, request: &NostrConnectRequest) -> Result<(), CoreError>;
}

/// The interactive approval consumer. `notify_pending` only hands the
/// descriptor to whatever UI renders it; the core itself awaits the
/// `PendingApproval`'s one-shot channel directly; this trait is the seam
/// that lets the approval be modelled as an async task rather than a
/// blocking callback (§9 redesign flag).
#[async_trait]
pub trait Approver: Send + Sync {
    async fn notify_pending(&self, pending: &PendingApproval);
}
