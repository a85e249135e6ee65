//! NIP-46 envelope handling (§6, §4.1 step 2): maps the bunker transport's
//! request envelope into the domain `Request`/`CallerIdentity` pair the
//! engine expects, validates `pubkey`/`method` before the engine ever sees
//! them, and -- on `Allow` -- drives the `Signer`.
//!
//! The envelope itself carries no separate peer pubkey for the NIP-04/44
//! methods; `event_content` is the method's opaque payload. A transport
//! that already demultiplexed a peer pubkey out of the method's params may
//! attach it via [`Nip46Envelope::with_peer_pubkey`].

use std::sync::Arc;

use authority_types::{CallerIdentity, Request, RequestType};

use crate::domain::engine::Decision;
use crate::domain::errors::CoreError;
use crate::ports::inbound::AuthorizationPort;
use crate::ports::outbound::{Approver, Signer};

/// The full set of NIP-46 `method` values §6 allows. `connect` and `ping`
/// never reach the signer.
pub const NIP46_METHODS: [&str; 8] = [
    "connect",
    "get_public_key",
    "sign_event",
    "nip04_encrypt",
    "nip04_decrypt",
    "nip44_encrypt",
    "nip44_decrypt",
    "ping",
];

fn is_valid_pubkey(pubkey: &str) -> bool {
    pubkey.len() == 64 && pubkey.chars().all(|c| c.is_ascii_hexdigit())
}

/// §3: for `SIGN_EVENT`, the `kind` field is parsed out of the candidate
/// event JSON; anything that doesn't parse to an integer in `0..=65535` is
/// treated as absent rather than rejected here -- the engine's permission
/// lookup already handles a missing kind by falling back to the generic
/// `(caller, request_type, -1)` bucket.
pub fn parse_event_kind(event_content: &str) -> Option<u16> {
    let value: serde_json::Value = serde_json::from_str(event_content).ok()?;
    let kind = value.get("kind")?.as_u64()?;
    u16::try_from(kind).ok()
}

/// The wire shape described in §6, plus an adapter-level `peer_pubkey`
/// extension for methods that need one.
#[derive(Clone, Debug)]
pub struct Nip46Envelope {
    pub app_pubkey: String,
    pub app_name: String,
    pub method: String,
    pub event_kind: Option<u16>,
    pub event_content: Option<String>,
    pub peer_pubkey: Option<String>,
}

impl Nip46Envelope {
    pub fn new(app_pubkey: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            app_pubkey: app_pubkey.into(),
            app_name: String::new(),
            method: method.into(),
            event_kind: None,
            event_content: None,
            peer_pubkey: None,
        }
    }

    pub fn with_event_content(mut self, content: impl Into<String>) -> Self {
        self.event_content = Some(content.into());
        self
    }

    pub fn with_event_kind(mut self, kind: u16) -> Self {
        self.event_kind = Some(kind);
        self
    }

    pub fn with_peer_pubkey(mut self, pubkey: impl Into<String>) -> Self {
        self.peer_pubkey = Some(pubkey.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Nip46Response {
    Result(String),
    Pong,
    Denied,
    Rejected(String),
}

/// Drives the engine for the bunker transport. Holds no state of its own
/// beyond the engine and signer handles it was constructed with.
pub struct Nip46EnvelopeHandler {
    engine: Arc<dyn AuthorizationPort>,
    signer: Arc<dyn Signer>,
}

impl Nip46EnvelopeHandler {
    pub fn new(engine: Arc<dyn AuthorizationPort>, signer: Arc<dyn Signer>) -> Self {
        Self { engine, signer }
    }

    /// §4.1 step 2 input validation, then the full pipeline via
    /// `AuthorizationPort`, then (on `Allow`) the signer invocation.
    /// `ping` short-circuits before validation reaches the engine at all --
    /// it is a liveness probe, never an audited decision.
    pub async fn handle(&self, envelope: Nip46Envelope, approver: &(dyn Approver + Sync)) -> Nip46Response {
        if envelope.method == "ping" {
            return Nip46Response::Pong;
        }
        if !is_valid_pubkey(&envelope.app_pubkey) {
            return Nip46Response::Rejected("invalid_input".to_string());
        }
        if envelope.method.is_empty() || !NIP46_METHODS.contains(&envelope.method.as_str()) {
            return Nip46Response::Rejected("invalid_input".to_string());
        }

        let is_connect = envelope.method == "connect";
        // `connect` carries no signer-facing request type of its own; the
        // engine only branches on `is_connect`, so any request type is a
        // representative placeholder for the permission/audit keying this
        // one pipeline pass produces.
        let request_type = if is_connect {
            RequestType::GetPublicKey
        } else {
            match RequestType::from_nip46_method(&envelope.method) {
                Some(rt) => rt,
                None => return Nip46Response::Rejected("invalid_input".to_string()),
            }
        };

        let event_kind = envelope
            .event_kind
            .or_else(|| envelope.event_content.as_deref().and_then(parse_event_kind));

        let caller = CallerIdentity::nip46(envelope.app_pubkey.clone());
        let mut request = Request::new(request_type, envelope.event_content.clone().unwrap_or_default().into_bytes())
            .with_event_kind(event_kind);
        if let Some(peer) = &envelope.peer_pubkey {
            request = request.with_peer_pubkey(peer.clone());
        }

        match self.engine.authorize(request.clone(), caller.clone(), is_connect, approver).await {
            Decision::Rejected(reason) => Nip46Response::Rejected(reason),
            Decision::Deny => Nip46Response::Denied,
            Decision::Allow if is_connect => Nip46Response::Result(String::new()),
            Decision::Allow => self.invoke_signer(request_type, &request).await,
        }
    }

    async fn invoke_signer(&self, request_type: RequestType, request: &Request) -> Nip46Response {
        let peer = || {
            request
                .peer_pubkey
                .as_deref()
                .ok_or_else(|| CoreError::InvalidInput {
                    reason: "peer_pubkey required for this method".to_string(),
                })
        };
        let outcome: Result<String, CoreError> = match request_type {
            RequestType::GetPublicKey => self.signer.get_public_key().await,
            RequestType::SignEvent => self.signer.sign_event(&request.content).await,
            RequestType::Nip04Encrypt => match peer() {
                Ok(p) => self.signer.nip04_encrypt(p, &request.content).await,
                Err(e) => Err(e),
            },
            RequestType::Nip04Decrypt => match peer() {
                Ok(p) => self.signer.nip04_decrypt(p, &request.content).await,
                Err(e) => Err(e),
            },
            RequestType::Nip44Encrypt => match peer() {
                Ok(p) => self.signer.nip44_encrypt(p, &request.content).await,
                Err(e) => Err(e),
            },
            RequestType::Nip44Decrypt => match peer() {
                Ok(p) => self.signer.nip44_decrypt(p, &request.content).await,
                Err(e) => Err(e),
            },
            RequestType::DecryptZapEvent => self.signer.decrypt_zap_event(&request.content).await,
        };
        match outcome {
            Ok(result) => Nip46Response::Result(result),
            Err(_) => Nip46Response::Rejected("not_initialized".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::approval::ApprovalRegistry;
    use crate::domain::audit::AuditChain;
    use crate::domain::config::Configuration;
    use crate::domain::engine::AuthorizationEngine;
    use crate::domain::nip46::Nip46SessionManager;
    use crate::domain::permission::{GrantDuration, PermissionStore};
    use crate::domain::caller_verifier::CallerVerifier;
    use crate::domain::rate_limit::RateLimiter;
    use crate::domain::risk::RiskAssessor;
    use crate::domain::velocity::VelocityTracker;
    use authority_types::{Clock, InMemoryKvStore, KeyValueStore, MockClock};
    use std::time::Duration;

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

    struct AutoAllowApprover {
        duration: GrantDuration,
        registry: Arc<ApprovalRegistry>,
    }

    #[async_trait::async_trait]
    impl Approver for AutoAllowApprover {
        async fn notify_pending(&self, pending: &crate::domain::approval::PendingApproval) {
            self.registry.resolve(
                &pending.id,
                crate::domain::approval::ApprovalResponse::Allow { duration: self.duration },
            );
        }
    }

    fn handler() -> (Nip46EnvelopeHandler, Arc<ApprovalRegistry>) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let clock: Arc<dyn Clock> = Arc::new(MockClock::new(0));
        let config = Arc::new(Configuration::new(kv.clone()).unwrap());
        let permissions = Arc::new(PermissionStore::new(kv.clone(), clock.clone()));
        let audit = Arc::new(AuditChain::new(kv.clone(), clock.clone(), b"k".to_vec()).unwrap());
        let rate_limiter = Arc::new(RateLimiter::new(clock.clone()));
        let velocity = Arc::new(VelocityTracker::new(kv.clone(), clock.clone()));
        let risk = Arc::new(RiskAssessor::new(clock.clone()));
        let approvals = Arc::new(ApprovalRegistry::new(clock.clone()));
        let sessions = Arc::new(Nip46SessionManager::new(kv.clone()));
        let caller_verifier = Arc::new(CallerVerifier::new(kv));
        let engine: Arc<dyn AuthorizationPort> = Arc::new(
            AuthorizationEngine::new(
                config,
                permissions,
                audit,
                rate_limiter,
                velocity,
                risk,
                approvals.clone(),
                sessions,
                caller_verifier,
            )
            .with_approval_timeout(Duration::from_millis(200)),
        );
        (Nip46EnvelopeHandler::new(engine, Arc::new(StubSigner)), approvals)
    }

    struct NeverRespond;
    #[async_trait::async_trait]
    impl Approver for NeverRespond {
        async fn notify_pending(&self, _pending: &crate::domain::approval::PendingApproval) {}
    }

    #[tokio::test]
    async fn ping_short_circuits_before_validation() {
        let (handler, _approvals) = handler();
        let envelope = Nip46Envelope::new("not-a-valid-pubkey", "ping");
        assert_eq!(handler.handle(envelope, &NeverRespond).await, Nip46Response::Pong);
    }

    #[tokio::test]
    async fn invalid_pubkey_is_rejected() {
        let (handler, approvals) = handler();
        let envelope = Nip46Envelope::new("short", "get_public_key");
        let response = handler.handle(envelope, &NeverRespond).await;
        assert_eq!(response, Nip46Response::Rejected("invalid_input".to_string()));
        assert_eq!(approvals.global_count(), 0);
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let (handler, _approvals) = handler();
        let envelope = Nip46Envelope::new("a".repeat(64), "not_a_real_method");
        let response = handler.handle(envelope, &NeverRespond).await;
        assert_eq!(response, Nip46Response::Rejected("invalid_input".to_string()));
    }

    #[tokio::test]
    async fn connect_allow_returns_result_and_authorizes_client() {
        let (handler, approvals) = handler();
        let approver = AutoAllowApprover {
            duration: GrantDuration::JustThisTime,
            registry: approvals,
        };
        let pubkey = "a".repeat(64);
        let envelope = Nip46Envelope::new(pubkey, "connect");
        let response = handler.handle(envelope, &approver).await;
        assert_eq!(response, Nip46Response::Result(String::new()));
    }

    #[tokio::test]
    async fn sign_event_allow_invokes_signer_with_parsed_kind() {
        let (handler, approvals) = handler();
        let approver = AutoAllowApprover {
            duration: GrantDuration::OneHour,
            registry: approvals,
        };
        let pubkey = "a".repeat(64);
        let envelope = Nip46Envelope::new(pubkey, "sign_event").with_event_content(r#"{"kind":1,"content":"hi"}"#);
        let response = handler.handle(envelope, &approver).await;
        assert_eq!(response, Nip46Response::Result("signature".to_string()));
    }

    #[test]
    fn parse_event_kind_reads_kind_field() {
        assert_eq!(parse_event_kind(r#"{"kind":1}"#), Some(1));
    }

    #[test]
    fn parse_event_kind_rejects_out_of_range() {
        assert_eq!(parse_event_kind(r#"{"kind":99999999}"#), None);
    }

    #[test]
    fn parse_event_kind_absent_on_malformed_json() {
        assert_eq!(parse_event_kind("not json"), None);
    }

    #[test]
    fn parse_event_kind_absent_when_field_missing() {
        assert_eq!(parse_event_kind(r#"{"content":"hi"}"#), None);
    }
}
