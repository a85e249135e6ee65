//! IPC Query Adapter (§4.10): the synchronous, cursor-style entry point
//! local OS packages call into. Unlike the NIP-46 transport, this path
//! never prompts a human -- only a stored permission or an automatic
//! denial can answer it. A miss (no stored decision, would otherwise need
//! an interactive prompt) surfaces as `rejected`, not as a hang.

use std::sync::Arc;
use std::time::Duration;

use authority_types::{CallerIdentity, Request, RequestType};

use crate::domain::errors::CoreError;
use crate::domain::permission::{PermissionDecision, PermissionStore};
use crate::domain::rate_limit::{RateLimitOutcome, RateLimiter};
use crate::domain::velocity::{VelocityOutcome, VelocityTracker};
use crate::ports::outbound::Signer;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// One row of the IPC response cursor. Exactly one of `result`, `event`,
/// `error`, or `rejected` is populated; `id`/`pubkey` always echo what the
/// caller supplied (§4.10 invariant).
#[derive(Clone, Debug, Default)]
pub struct IpcCursorRow {
    pub id: Option<String>,
    pub pubkey: Option<String>,
    pub result: Option<String>,
    pub event: Option<String>,
    pub error: Option<String>,
    pub rejected: Option<String>,
}

impl IpcCursorRow {
    /// Column names, in the fixed order the cursor-backed transport
    /// expects them.
    pub const COLUMNS: [&'static str; 6] = ["result", "event", "error", "id", "pubkey", "rejected"];

    fn ok(id: Option<String>, pubkey: Option<String>, result: String) -> Self {
        Self {
            id,
            pubkey,
            result: Some(result),
            ..Default::default()
        }
    }

    fn rejected(id: Option<String>, pubkey: Option<String>, reason: &str) -> Self {
        Self {
            id,
            pubkey,
            rejected: Some(reason.to_string()),
            ..Default::default()
        }
    }

    fn error(id: Option<String>, pubkey: Option<String>, message: String) -> Self {
        Self {
            id,
            pubkey,
            error: Some(message),
            ..Default::default()
        }
    }
}

/// Drives the non-interactive half of the pipeline: rate limit, velocity,
/// and stored-permission lookup only. An `Ask`/missing permission never
/// blocks waiting on a human here -- it is reported as `rejected` so the
/// caller can fall back to its own foreground-approval path if it has one.
pub struct IpcQueryAdapter {
    permissions: Arc<PermissionStore>,
    rate_limiter: Arc<RateLimiter>,
    velocity: Arc<VelocityTracker>,
    signer: Arc<dyn Signer>,
}

impl IpcQueryAdapter {
    pub fn new(
        permissions: Arc<PermissionStore>,
        rate_limiter: Arc<RateLimiter>,
        velocity: Arc<VelocityTracker>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        Self {
            permissions,
            rate_limiter,
            velocity,
            signer,
        }
    }

    /// Validates and answers one IPC-transport request. `caller` must
    /// already have been resolved by the transport (package name + signing
    /// certificate hash); `None` produces an `unknown_caller` marker.
    pub async fn query(&self, request: Request, caller: Option<CallerIdentity>) -> IpcCursorRow {
        let id = request.id.clone();
        let pubkey = request.peer_pubkey.clone();

        let Some(caller) = caller else {
            return IpcCursorRow::rejected(id, pubkey, "unknown_caller");
        };

        if let Err(reason) = request.validate_lengths() {
            return IpcCursorRow::error(id, pubkey, reason.to_string());
        }

        let caller_key = caller.canonical();

        if let RateLimitOutcome::Limited { .. } = self.rate_limiter.check(&caller_key) {
            return IpcCursorRow::rejected(id, pubkey, "rate_limited");
        }

        match self.velocity.check_and_record(&caller_key, request.event_kind) {
            Ok(VelocityOutcome::Allowed) => {}
            Ok(VelocityOutcome::Blocked { .. }) => {
                return IpcCursorRow::rejected(id, pubkey, "velocity_exceeded");
            }
            Err(err) => {
                return IpcCursorRow::error(id, pubkey, err.to_string());
            }
        }

        let lookup = tokio::time::timeout(
            LOOKUP_TIMEOUT,
            self.resolve_permission(&caller_key, request.request_type, request.event_kind),
        )
        .await;

        let decision = match lookup {
            Ok(Ok(decision)) => decision,
            Ok(Err(err)) => return IpcCursorRow::error(id, pubkey, err.to_string()),
            Err(_) => return IpcCursorRow::rejected(id, pubkey, "lookup_timeout"),
        };

        match decision {
            Some(PermissionDecision::Allow) => self.invoke_signer(id, pubkey, request).await,
            Some(PermissionDecision::Deny) => IpcCursorRow::rejected(id, pubkey, "denied"),
            Some(PermissionDecision::Ask) | None => IpcCursorRow::rejected(id, pubkey, "rejected"),
        }
    }

    async fn resolve_permission(
        &self,
        caller: &str,
        request_type: RequestType,
        event_kind: Option<u16>,
    ) -> Result<Option<PermissionDecision>, CoreError> {
        let permission = self.permissions.resolve(caller, request_type, event_kind)?;
        Ok(permission.map(|p| p.decision))
    }

    async fn invoke_signer(&self, id: Option<String>, pubkey: Option<String>, request: Request) -> IpcCursorRow {
        let peer_required = |request: &Request| -> Result<&str, CoreError> {
            request.peer_pubkey.as_deref().ok_or_else(|| CoreError::InvalidInput {
                reason: "peer_pubkey required for this request type".to_string(),
            })
        };
        let outcome: Result<String, CoreError> = async {
            match request.request_type {
                RequestType::GetPublicKey => self.signer.get_public_key().await,
                RequestType::SignEvent => self.signer.sign_event(&request.content).await,
                RequestType::Nip04Encrypt => {
                    let peer = peer_required(&request)?;
                    self.signer.nip04_encrypt(peer, &request.content).await
                }
                RequestType::Nip04Decrypt => {
                    let peer = peer_required(&request)?;
                    self.signer.nip04_decrypt(peer, &request.content).await
                }
                RequestType::Nip44Encrypt => {
                    let peer = peer_required(&request)?;
                    self.signer.nip44_encrypt(peer, &request.content).await
                }
                RequestType::Nip44Decrypt => {
                    let peer = peer_required(&request)?;
                    self.signer.nip44_decrypt(peer, &request.content).await
                }
                RequestType::DecryptZapEvent => self.signer.decrypt_zap_event(&request.content).await,
            }
        }
        .await;
        match outcome {
            Ok(result) => IpcCursorRow::ok(id, pubkey, result),
            Err(err) => IpcCursorRow::error(id, pubkey, err.to_string()),
        }
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authority_types::{InMemoryKvStore, MockClock, SystemClock};
    use crate::domain::permission::GrantDuration;
    use std::sync::Arc;

    struct StubSigner;

    #[async_trait::async_trait]
    impl Signer for StubSigner {
        async fn get_public_key(&self) -> Result<String, CoreError> {
            Ok("pubkey".to_string())
        }
        async fn sign_event(&self, _event_json: &[u8]) -> Result<String, CoreError> {
            Ok("signature".to_string())
        }
        async fn nip04_encrypt(&self, _peer: &str, _plaintext: &[u8]) -> Result<String, CoreError> {
            Ok("ciphertext".to_string())
        }
        async fn nip04_decrypt(&self, _peer: &str, _ciphertext: &[u8]) -> Result<String, CoreError> {
            Ok("plaintext".to_string())
        }
        async fn nip44_encrypt(&self, _peer: &str, _plaintext: &[u8]) -> Result<String, CoreError> {
            Ok("ciphertext44".to_string())
        }
        async fn nip44_decrypt(&self, _peer: &str, _ciphertext: &[u8]) -> Result<String, CoreError> {
            Ok("plaintext44".to_string())
        }
        async fn decrypt_zap_event(&self, _event_json: &[u8]) -> Result<String, CoreError> {
            Ok("zap".to_string())
        }
    }

    fn adapter() -> IpcQueryAdapter {
        let kv: Arc<dyn authority_types::KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let clock: Arc<dyn authority_types::Clock> = Arc::new(MockClock::new(0));
        IpcQueryAdapter::new(
            Arc::new(PermissionStore::new(kv.clone(), clock.clone())),
            Arc::new(RateLimiter::new(Arc::new(SystemClock) as Arc<dyn authority_types::Clock>)),
            Arc::new(VelocityTracker::new(kv, clock)),
            Arc::new(StubSigner),
        )
    }

    #[tokio::test]
    async fn missing_caller_is_rejected_as_unknown() {
        let adapter = adapter();
        let row = adapter
            .query(Request::new(RequestType::GetPublicKey, vec![]), None)
            .await;
        assert_eq!(row.rejected.as_deref(), Some("unknown_caller"));
    }

    #[tokio::test]
    async fn no_stored_permission_is_rejected() {
        let adapter = adapter();
        let row = adapter
            .query(
                Request::new(RequestType::GetPublicKey, vec![]),
                Some(CallerIdentity::local("pkg", "sig")),
            )
            .await;
        assert_eq!(row.rejected.as_deref(), Some("rejected"));
    }

    #[tokio::test]
    async fn oversized_content_is_an_error_not_rejection() {
        let adapter = adapter();
        let row = adapter
            .query(
                Request::new(RequestType::SignEvent, vec![0u8; authority_types::request::MAX_CONTENT_BYTES + 1]),
                Some(CallerIdentity::local("pkg", "sig")),
            )
            .await;
        assert!(row.error.is_some());
    }

    #[tokio::test]
    async fn allowed_permission_invokes_signer() {
        let adapter = adapter();
        adapter
            .permissions()
            .grant("pkg", RequestType::GetPublicKey, -1, GrantDuration::Forever)
            .unwrap();
        let row = adapter
            .query(
                Request::new(RequestType::GetPublicKey, vec![]),
                Some(CallerIdentity::local("pkg", "sig")),
            )
            .await;
        assert_eq!(row.result.as_deref(), Some("pubkey"));
    }

    #[tokio::test]
    async fn denied_permission_is_rejected() {
        let adapter = adapter();
        adapter
            .permissions()
            .deny("pkg", RequestType::GetPublicKey, -1, GrantDuration::Forever)
            .unwrap();
        let row = adapter
            .query(
                Request::new(RequestType::GetPublicKey, vec![]),
                Some(CallerIdentity::local("pkg", "sig")),
            )
            .await;
        assert_eq!(row.rejected.as_deref(), Some("denied"));
    }
}
