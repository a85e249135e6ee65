//! Permission Store (§4.2): persistent grant/deny/ask decisions keyed by
//! `(caller, request_type, event_kind)`, with expiry.

use authority_types::{is_sensitive_kind, BatchOperation, Clock, KeyValueStore, RequestType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::audit::AuditChain;
use super::errors::{CoreError, CoreResult};

/// A stored authorization decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionDecision {
    Allow,
    Deny,
    Ask,
}

/// How long a granted/denied/asked decision should persist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantDuration {
    /// Not persisted at all -- the engine applies this decision once and
    /// never calls the Permission Store.
    JustThisTime,
    OneHour,
    OneDay,
    OneWeek,
    Forever,
}

impl GrantDuration {
    fn millis(self) -> Option<u64> {
        const HOUR: u64 = 3_600_000;
        match self {
            GrantDuration::JustThisTime => None,
            GrantDuration::OneHour => Some(HOUR),
            GrantDuration::OneDay => Some(HOUR * 24),
            GrantDuration::OneWeek => Some(HOUR * 24 * 7),
            GrantDuration::Forever => None,
        }
    }
}

/// One row of the Permission Store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Permission {
    pub caller: String,
    pub request_type: RequestType,
    /// `-1` is the sentinel meaning "any kind for this request type".
    pub event_kind: i32,
    pub decision: PermissionDecision,
    pub created_at_ms: u64,
    pub expires_at_ms: Option<u64>,
}

impl Permission {
    /// §4.2: computed from wall clock with a backward-jump guard -- a
    /// clock reading before `created_at_ms` is treated as expired, since
    /// persisted expiries cannot rely on a monotonic origin surviving a
    /// reboot (§9 open question).
    fn is_expired(&self, now_ms: u64) -> bool {
        if now_ms < self.created_at_ms {
            return true;
        }
        matches!(self.expires_at_ms, Some(exp) if exp <= now_ms)
    }
}

fn request_type_tag(rt: RequestType) -> u8 {
    match rt {
        RequestType::GetPublicKey => 0,
        RequestType::SignEvent => 1,
        RequestType::Nip04Encrypt => 2,
        RequestType::Nip04Decrypt => 3,
        RequestType::Nip44Encrypt => 4,
        RequestType::Nip44Decrypt => 5,
        RequestType::DecryptZapEvent => 6,
    }
}

fn permission_key(caller: &str, request_type: RequestType, event_kind: i32) -> Vec<u8> {
    format!(
        "perm:{caller}:{}:{event_kind}",
        request_type_tag(request_type)
    )
    .into_bytes()
}

fn permission_prefix(caller: &str) -> Vec<u8> {
    format!("perm:{caller}:").into_bytes()
}

/// Persistent grant/deny/ask decisions. Backed by the `KeyValueStore` port
/// (§2a); rows are serialized with `bincode` and keyed by
/// `caller|request_type|event_kind`.
pub struct PermissionStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl PermissionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns the active decision for the exact `(caller, request_type,
    /// event_kind)` tuple, or `None` if absent or expired.
    pub fn get(
        &self,
        caller: &str,
        request_type: RequestType,
        event_kind: i32,
    ) -> CoreResult<Option<Permission>> {
        let key = permission_key(caller, request_type, event_kind);
        let raw = self.store.get(&key)?;
        let Some(bytes) = raw else { return Ok(None) };
        let perm: Permission =
            bincode::deserialize(&bytes).map_err(|e| CoreError::DependencyUnavailable {
                reason: e.to_string(),
            })?;
        if perm.is_expired(self.clock.now_ms()) {
            return Ok(None);
        }
        Ok(Some(perm))
    }

    /// Implements the engine's stored-permission lookup (§4.1 step 5):
    /// exact match first, then the generic `(caller, request_type, -1)`
    /// bucket unless `event_kind` is a sensitive kind.
    pub fn resolve(
        &self,
        caller: &str,
        request_type: RequestType,
        event_kind: Option<u16>,
    ) -> CoreResult<Option<Permission>> {
        if let Some(kind) = event_kind {
            if let Some(p) = self.get(caller, request_type, kind as i32)? {
                return Ok(Some(p));
            }
            if is_sensitive_kind(kind) {
                return Ok(None);
            }
        }
        self.get(caller, request_type, Permission::ANY_KIND)
    }

    pub fn grant(
        &self,
        caller: &str,
        request_type: RequestType,
        event_kind: i32,
        duration: GrantDuration,
    ) -> CoreResult<()> {
        self.put_decision(caller, request_type, event_kind, PermissionDecision::Allow, duration)
    }

    pub fn deny(
        &self,
        caller: &str,
        request_type: RequestType,
        event_kind: i32,
        duration: GrantDuration,
    ) -> CoreResult<()> {
        self.put_decision(caller, request_type, event_kind, PermissionDecision::Deny, duration)
    }

    pub fn set_ask(
        &self,
        caller: &str,
        request_type: RequestType,
        event_kind: i32,
    ) -> CoreResult<()> {
        self.put_decision(
            caller,
            request_type,
            event_kind,
            PermissionDecision::Ask,
            GrantDuration::Forever,
        )
    }

    fn put_decision(
        &self,
        caller: &str,
        request_type: RequestType,
        event_kind: i32,
        decision: PermissionDecision,
        duration: GrantDuration,
    ) -> CoreResult<()> {
        if matches!(duration, GrantDuration::JustThisTime) {
            // Not persisted; the engine never calls this path for
            // JustThisTime, but guard against misuse defensively.
            return Ok(());
        }
        let now_ms = self.clock.now_ms();
        // Sensitive kinds never get a FOREVER grant (§3): silently
        // downgrade to ONE_DAY at grant time.
        let effective_duration = if event_kind >= 0
            && is_sensitive_kind(event_kind as u16)
            && matches!(duration, GrantDuration::Forever)
        {
            GrantDuration::OneDay
        } else {
            duration
        };
        let expires_at_ms = effective_duration.millis().map(|ms| now_ms + ms);
        let perm = Permission {
            caller: caller.to_string(),
            request_type,
            event_kind,
            decision,
            created_at_ms: now_ms,
            expires_at_ms,
        };
        let bytes = bincode::serialize(&perm).map_err(|e| CoreError::DependencyUnavailable {
            reason: e.to_string(),
        })?;
        let key = permission_key(caller, request_type, event_kind);
        // Uniqueness invariant (§3): insert replaces, which a plain `put`
        // on a single-key row already guarantees.
        self.store.put(&key, &bytes)?;
        Ok(())
    }

    pub fn revoke(
        &self,
        caller: &str,
        request_type: Option<RequestType>,
        event_kind: Option<i32>,
    ) -> CoreResult<()> {
        match (request_type, event_kind) {
            (Some(rt), Some(kind)) => {
                self.store.delete(&permission_key(caller, rt, kind))?;
            }
            (Some(rt), None) => {
                self.store.delete(&permission_key(caller, rt, Permission::ANY_KIND))?;
                // Also drop any exact-kind rows for this request type.
                let prefix = permission_prefix(caller);
                for (key, _) in self.store.prefix_scan(&prefix)? {
                    if self.decode_if_matches(&key, Some(rt))?.is_some() {
                        self.store.delete(&key)?;
                    }
                }
            }
            _ => self.revoke_all(caller)?,
        }
        Ok(())
    }

    /// Removes every permission for `caller`. Used by NIP-46 client
    /// revocation (§4.9), always inside the same transaction as the
    /// session manager's authorized-set removal.
    pub fn revoke_all(&self, caller: &str) -> CoreResult<()> {
        let prefix = permission_prefix(caller);
        let rows = self.store.prefix_scan(&prefix)?;
        let ops = rows
            .into_iter()
            .map(|(key, _)| BatchOperation::delete(key))
            .collect();
        self.store.atomic_batch_write(ops)?;
        Ok(())
    }

    fn decode_if_matches(
        &self,
        key: &[u8],
        request_type: Option<RequestType>,
    ) -> CoreResult<Option<Permission>> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        let perm: Permission =
            bincode::deserialize(&bytes).map_err(|e| CoreError::DependencyUnavailable {
                reason: e.to_string(),
            })?;
        if let Some(rt) = request_type {
            if perm.request_type != rt {
                return Ok(None);
            }
        }
        Ok(Some(perm))
    }

    pub fn list(&self) -> CoreResult<Vec<Permission>> {
        let now_ms = self.clock.now_ms();
        let rows = self.store.prefix_scan(b"perm:")?;
        Ok(rows
            .into_iter()
            .filter_map(|(_, v)| bincode::deserialize::<Permission>(&v).ok())
            .filter(|p| !p.is_expired(now_ms))
            .collect())
    }

    pub fn list_for(&self, caller: &str) -> CoreResult<Vec<Permission>> {
        let now_ms = self.clock.now_ms();
        let rows = self.store.prefix_scan(&permission_prefix(caller))?;
        Ok(rows
            .into_iter()
            .filter_map(|(_, v)| bincode::deserialize::<Permission>(&v).ok())
            .filter(|p| !p.is_expired(now_ms))
            .collect())
    }

    /// Deletes expired rows. Reads otherwise already filter expired rows
    /// out lazily, so this is purely a housekeeping pass.
    pub fn cleanup_expired(&self) -> CoreResult<usize> {
        let now_ms = self.clock.now_ms();
        let rows = self.store.prefix_scan(b"perm:")?;
        let mut ops = Vec::new();
        for (key, value) in &rows {
            if let Ok(perm) = bincode::deserialize::<Permission>(value) {
                if perm.is_expired(now_ms) {
                    ops.push(BatchOperation::delete(key.clone()));
                }
            }
        }
        let removed = ops.len();
        if !ops.is_empty() {
            self.store.atomic_batch_write(ops)?;
        }
        Ok(removed)
    }

    /// Grants a decision and appends the corresponding audit entry in one
    /// logical transaction (§5's `with_transaction` requirement for
    /// grant+log).
    pub fn grant_with_audit(
        &self,
        audit: &AuditChain,
        caller: &str,
        request_type: RequestType,
        event_kind: i32,
        duration: GrantDuration,
        was_automatic: bool,
    ) -> CoreResult<()> {
        self.grant(caller, request_type, event_kind, duration)?;
        audit.append(caller, request_type, event_kind, super::audit::AuditDecision::Allow, was_automatic)?;
        Ok(())
    }
}

impl Permission {
    pub const ANY_KIND: i32 = authority_types::Request::ANY_KIND;
}
