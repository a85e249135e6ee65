//! End-to-end scenarios (§8) exercised against the composition root rather
//! than individual domain modules, the way `node-runtime`'s IPC suite drives
//! the event bus rather than a single handler in isolation.

use std::sync::Arc;
use std::time::Duration;

use authority_types::{CallerIdentity, Clock, InMemoryKvStore, KeyValueStore, MockClock, Request, RequestType};
use authorization_core::domain::approval::{ApprovalRegistry, ApprovalResponse, PendingApproval};
use authorization_core::domain::engine::Decision;
use authorization_core::domain::permission::GrantDuration;
use authorization_core::ports::inbound::AuthorizationPort;
use authorization_core::ports::outbound::Approver;
use authorization_core::AuthorizationCore;

struct AutoApprover {
    registry: Arc<ApprovalRegistry>,
    response: ApprovalResponse,
}

#[async_trait::async_trait]
impl Approver for AutoApprover {
    async fn notify_pending(&self, pending: &PendingApproval) {
        self.registry.resolve(&pending.id, self.response.clone());
    }
}

struct NeverRespond;
#[async_trait::async_trait]
impl Approver for NeverRespond {
    async fn notify_pending(&self, _pending: &PendingApproval) {}
}

fn core_with_timeout(timeout: Duration) -> (AuthorizationCore, Arc<dyn Clock>) {
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
    let clock: Arc<dyn Clock> = Arc::new(MockClock::new(0));
    let mut core = AuthorizationCore::new(store, clock.clone(), b"scenario-hmac-key".to_vec()).unwrap();
    core.engine = Arc::new(
        authorization_core::domain::engine::AuthorizationEngine::new(
            core.config.clone(),
            core.permissions.clone(),
            core.audit.clone(),
            core.rate_limiter.clone(),
            core.velocity.clone(),
            core.risk.clone(),
            core.approvals.clone(),
            core.sessions.clone(),
            core.caller_verifier.clone(),
        )
        .with_approval_timeout(timeout),
    );
    (core, clock)
}

/// S1: first connect, then sign_event twice -- the second ride is automatic.
#[tokio::test]
async fn s1_connect_then_sign_event_then_automatic_replay() {
    let (core, _clock) = core_with_timeout(Duration::from_secs(5));
    let caller = CallerIdentity::nip46("a".repeat(64));

    let connect_approver = AutoApprover {
        registry: core.approvals.clone(),
        response: ApprovalResponse::Allow { duration: GrantDuration::JustThisTime },
    };
    let connect_request = Request::new(RequestType::GetPublicKey, Vec::new());
    let decision = core.engine.authorize(connect_request, caller.clone(), true, &connect_approver).await;
    assert_eq!(decision, Decision::Allow);

    let sign_approver = AutoApprover {
        registry: core.approvals.clone(),
        response: ApprovalResponse::Allow { duration: GrantDuration::OneHour },
    };
    let sign_request = Request::new(RequestType::SignEvent, b"{\"kind\":1}".to_vec()).with_event_kind(Some(1));
    let decision = core.engine.authorize(sign_request.clone(), caller.clone(), false, &sign_approver).await;
    assert_eq!(decision, Decision::Allow);

    // Third call: stored permission auto-decides, no pending approval needed.
    let decision = core.engine.authorize(sign_request, caller, false, &NeverRespond).await;
    assert_eq!(decision, Decision::Allow);
    assert_eq!(core.approvals.global_count(), 0);
}

/// S2: a stored generic ALLOW never covers a sensitive kind.
#[tokio::test]
async fn s2_sensitive_kind_falls_through_generic_grant() {
    let (core, _clock) = core_with_timeout(Duration::from_millis(50));
    let caller = CallerIdentity::local("com.example.app", "cert-hash");
    let caller_key = caller.canonical();

    core.permissions
        .grant(&caller_key, RequestType::SignEvent, Request::ANY_KIND, GrantDuration::Forever)
        .unwrap();

    // event_kind 0 (profile metadata) is sensitive; the generic grant above
    // must not apply, so with nobody answering the approval this times out.
    let sensitive_request = Request::new(RequestType::SignEvent, Vec::new()).with_event_kind(Some(0));
    let decision = core.engine.authorize(sensitive_request, caller, false, &NeverRespond).await;
    assert_eq!(decision, Decision::Deny);
}

/// S4: an approval nobody answers times out and denies, leaving the
/// registry empty and exactly one audit entry behind.
#[tokio::test]
async fn s4_unanswered_approval_times_out() {
    let (core, _clock) = core_with_timeout(Duration::from_millis(50));
    let caller = CallerIdentity::local("com.example.app", "cert-hash");
    let request = Request::new(RequestType::GetPublicKey, Vec::new());

    let decision = core.engine.authorize(request, caller, false, &NeverRespond).await;
    assert_eq!(decision, Decision::Deny);
    assert_eq!(core.approvals.global_count(), 0);

    let page = core.audit.get_page(10, 0, None).unwrap();
    assert_eq!(page.len(), 1);
    assert!(!page[0].was_automatic);
}

/// S6: once the kill-switch is set, every request is denied without ever
/// creating a pending approval.
#[tokio::test]
async fn s6_kill_switch_denies_everything() {
    let (core, _clock) = core_with_timeout(Duration::from_secs(5));
    core.config.set_kill_switch(true).unwrap();
    let caller = CallerIdentity::local("com.example.app", "cert-hash");
    let request = Request::new(RequestType::GetPublicKey, Vec::new());

    let decision = core.engine.authorize(request, caller, false, &NeverRespond).await;
    assert_eq!(decision, Decision::Deny);
    assert_eq!(core.approvals.global_count(), 0);
}

/// A `connect` allow followed by `revoke` removes the client from
/// `authorized_clients` and denies the very next request.
#[tokio::test]
async fn connect_then_revoke_denies_subsequent_requests() {
    let (core, _clock) = core_with_timeout(Duration::from_secs(5));
    let pubkey = "b".repeat(64);
    let caller = CallerIdentity::nip46(pubkey.clone());

    let approver = AutoApprover {
        registry: core.approvals.clone(),
        response: ApprovalResponse::Allow { duration: GrantDuration::JustThisTime },
    };
    let connect_request = Request::new(RequestType::GetPublicKey, Vec::new());
    let decision = core.engine.authorize(connect_request, caller.clone(), true, &approver).await;
    assert_eq!(decision, Decision::Allow);
    assert!(core.sessions.is_authorized(&pubkey).unwrap());

    core.sessions.revoke(&pubkey, &core.permissions).unwrap();
    assert!(!core.sessions.is_authorized(&pubkey).unwrap());

    let follow_up = Request::new(RequestType::GetPublicKey, Vec::new());
    let decision = core.engine.authorize(follow_up, caller, false, &NeverRespond).await;
    assert_eq!(decision, Decision::Deny);
}
