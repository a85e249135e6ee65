//! Authorization Engine (§4.1): the pipeline orchestrator. One operation,
//! `authorize`, fans out to every other domain component in a fixed order
//! and guarantees exactly one audit entry per terminal decision.

use authority_types::{CallerIdentity, Clock, Request, RequestType};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::approval::{ApprovalRegistry, ApprovalResponse};
use super::audit::{AuditChain, AuditDecision};
use super::caller_verifier::{CallerVerifier, VerifyResult};
use super::config::Configuration;
use super::nip46::Nip46SessionManager;
use super::permission::{GrantDuration, PermissionDecision, PermissionStore};
use super::rate_limit::{RateLimitOutcome, RateLimiter};
use super::risk::RiskAssessor;
use super::velocity::{VelocityOutcome, VelocityTracker};

use crate::ports::outbound::Approver;

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    /// Malformed input; never audited (§7).
    Rejected(String),
}

fn is_valid_nip46_pubkey(pubkey: &str) -> bool {
    pubkey.len() == 64 && pubkey.chars().all(|c| c.is_ascii_hexdigit())
}

pub struct AuthorizationEngine {
    config: Arc<Configuration>,
    permissions: Arc<PermissionStore>,
    audit: Arc<AuditChain>,
    rate_limiter: Arc<RateLimiter>,
    velocity: Arc<VelocityTracker>,
    risk: Arc<RiskAssessor>,
    approvals: Arc<ApprovalRegistry>,
    sessions: Arc<Nip46SessionManager>,
    caller_verifier: Arc<CallerVerifier>,
    approval_timeout: Duration,
}

impl AuthorizationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Configuration>,
        permissions: Arc<PermissionStore>,
        audit: Arc<AuditChain>,
        rate_limiter: Arc<RateLimiter>,
        velocity: Arc<VelocityTracker>,
        risk: Arc<RiskAssessor>,
        approvals: Arc<ApprovalRegistry>,
        sessions: Arc<Nip46SessionManager>,
        caller_verifier: Arc<CallerVerifier>,
    ) -> Self {
        Self {
            config,
            permissions,
            audit,
            rate_limiter,
            velocity,
            risk,
            approvals,
            sessions,
            caller_verifier,
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    fn record(
        &self,
        caller: &str,
        request_type: RequestType,
        event_kind: Option<u16>,
        decision: AuditDecision,
        was_automatic: bool,
    ) {
        if let Err(err) = self
            .audit
            .append(caller, request_type, event_kind, decision, was_automatic)
        {
            warn!(error = %err, "audit append failed");
        }
    }

    /// §4.1: runs the full ten-step decision pipeline. `approver` is a
    /// borrowed capability (§3 Ownership), never stored past this call.
    pub async fn authorize(
        &self,
        request: Request,
        caller: CallerIdentity,
        is_connect: bool,
        approver: &(dyn Approver + Sync),
    ) -> Decision {
        let caller_key = caller.canonical();
        debug!(caller = %caller_key, request_type = ?request.request_type, "authorize: start");

        // 1. Kill-switch check.
        if self.config.get().kill_switch_enabled {
            self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
            return Decision::Deny;
        }

        // 2. Input validation.
        if let CallerIdentity::Nip46Client { pubkey } = &caller {
            if !is_valid_nip46_pubkey(pubkey) {
                return Decision::Rejected("invalid_input".to_string());
            }
        }
        if request.validate_lengths().is_err() {
            return Decision::Rejected("invalid_input".to_string());
        }

        // 2b. Caller verification (§4.6): TOFU signature-hash check for
        // local callers. NIP-46 clients are verified by pubkey shape above
        // and by session authorization in the next step.
        let mut first_use_pending_trust = false;
        if let CallerIdentity::LocalPackage { name, signature_hash } = &caller {
            match self.caller_verifier.verify_or_trust(name, Some(signature_hash.as_str())) {
                Ok(VerifyResult::Verified) => {}
                Ok(VerifyResult::FirstUseRequiresApproval) => {
                    first_use_pending_trust = true;
                }
                Ok(VerifyResult::SignatureMismatch) | Ok(VerifyResult::NotInstalled) => {
                    self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
                    return Decision::Deny;
                }
                Err(err) => {
                    warn!(error = %err, "caller verification failed");
                    self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
                    return Decision::Deny;
                }
            }
        }

        // 3. Rate limit.
        if let RateLimitOutcome::Limited { .. } = self.rate_limiter.check(&caller_key) {
            self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
            return Decision::Deny;
        }

        // 4. Authorization (NIP-46 only).
        if let Some(pubkey) = caller.nip46_pubkey() {
            if !is_connect {
                match self.sessions.is_authorized(pubkey) {
                    Ok(true) => {}
                    Ok(false) => {
                        self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
                        return Decision::Deny;
                    }
                    Err(err) => {
                        warn!(error = %err, "session lookup failed");
                        self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
                        return Decision::Deny;
                    }
                }
            }
        }

        // 5. Stored-permission lookup.
        match self.permissions.resolve(&caller_key, request.request_type, request.event_kind) {
            Ok(Some(perm)) => match perm.decision {
                PermissionDecision::Allow => {
                    self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Allow, true);
                    return Decision::Allow;
                }
                PermissionDecision::Deny => {
                    self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
                    return Decision::Deny;
                }
                PermissionDecision::Ask => {}
            },
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "permission lookup failed");
                self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
                return Decision::Deny;
            }
        }

        // 6. Velocity check.
        match self.velocity.check_and_record(&caller_key, request.event_kind) {
            Ok(VelocityOutcome::Allowed) => {}
            Ok(VelocityOutcome::Blocked { .. }) => {
                self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
                return Decision::Deny;
            }
            Err(err) => {
                warn!(error = %err, "velocity check failed");
                self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
                return Decision::Deny;
            }
        }

        // 7. Risk scoring (advisory).
        let auth_level = self.risk.assess(&caller_key, request.event_kind).auth_level();

        // 8. Pending approval.
        let (pending, rx) = match self.approvals.try_admit(&caller_key, request.clone(), is_connect, auth_level) {
            Ok(v) => v,
            Err(_) => {
                self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
                return Decision::Deny;
            }
        };
        let pending_id = pending.id.clone();
        approver.notify_pending(&pending).await;

        // 9. Await decision.
        let response = match tokio::time::timeout(self.approval_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) | Err(_) => {
                self.approvals.evict_timeout(&pending_id);
                self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, true);
                return Decision::Deny;
            }
        };

        // 10. Post-decision side effects.
        match response {
            ApprovalResponse::Deny => {
                self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Deny, false);
                Decision::Deny
            }
            ApprovalResponse::Allow { duration } => {
                let event_kind_i32 = request.event_kind.map(i32::from).unwrap_or(Request::ANY_KIND);
                // `connect` only ever approves the session itself (step 10's
                // `sessions.authorize` below); persisting a Permission Store
                // row for it would let a later genuine request key against
                // the same placeholder request type and auto-allow.
                if !is_connect && !matches!(duration, GrantDuration::JustThisTime) {
                    if let Err(err) = self.permissions.grant(&caller_key, request.request_type, event_kind_i32, duration) {
                        warn!(error = %err, "failed to persist granted permission");
                    }
                }
                if first_use_pending_trust {
                    if let CallerIdentity::LocalPackage { name, signature_hash } = &caller {
                        if let Err(err) = self.caller_verifier.confirm_trust(name, signature_hash) {
                            warn!(error = %err, "failed to persist caller trust");
                        }
                    }
                }
                if is_connect {
                    if let Some(pubkey) = caller.nip46_pubkey() {
                        if let Err(err) = self.sessions.authorize(pubkey) {
                            warn!(error = %err, "failed to authorize nip-46 client");
                        }
                    }
                } else {
                    self.rate_limiter.reset_backoff(&caller_key);
                }
                self.record(&caller_key, request.request_type, request.event_kind, AuditDecision::Allow, false);
                Decision::Allow
            }
        }
    }

}

#[async_trait::async_trait]
impl crate::ports::inbound::AuthorizationPort for AuthorizationEngine {
    async fn authorize(
        &self,
        request: Request,
        caller: CallerIdentity,
        is_connect: bool,
        approver: &(dyn Approver + Sync),
    ) -> Decision {
        AuthorizationEngine::authorize(self, request, caller, is_connect, approver).await
    }
}
