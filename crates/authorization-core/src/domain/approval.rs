//! Approval Registry (§4.8): maps pending approval ids to a one-shot
//! response channel and enforces concurrency caps. Admission and
//! duplicate-rejection happen under a single exclusive lock to prevent
//! over-admit under contention (§5).

use authority_types::{Clock, Request};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

use super::errors::{CoreError, CoreResult};
use super::permission::GrantDuration;
use super::risk::AuthLevel;

pub const MAX_PENDING_APPROVALS: usize = 10;
pub const MAX_CONCURRENT_PER_CLIENT: usize = 3;

/// The interactive adapter's resolution of a pending approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalResponse {
    Allow { duration: GrantDuration },
    Deny,
}

/// Descriptor handed to the interactive adapter. Carries the full request
/// so the adapter can render it; display sanitization is the adapter's
/// responsibility (§4.11), not the registry's.
pub struct PendingApproval {
    pub id: String,
    pub caller: String,
    pub request: Request,
    pub is_connect: bool,
    pub required_auth_level: AuthLevel,
    pub enqueue_time: Instant,
}

struct Slot {
    caller: String,
    sender: Option<oneshot::Sender<ApprovalResponse>>,
}

struct RegistryState {
    slots: HashMap<String, Slot>,
    per_client_counts: HashMap<String, usize>,
}

pub struct ApprovalRegistry {
    state: parking_lot::Mutex<RegistryState>,
    clock: Arc<dyn Clock>,
}

impl ApprovalRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: parking_lot::Mutex::new(RegistryState {
                slots: HashMap::new(),
                per_client_counts: HashMap::new(),
            }),
            clock,
        }
    }

    /// Admits a new pending approval, or returns `CapacityExhausted` if the
    /// global or per-client cap is already at its limit.
    pub fn try_admit(
        &self,
        caller: &str,
        request: Request,
        is_connect: bool,
        required_auth_level: AuthLevel,
    ) -> CoreResult<(PendingApproval, oneshot::Receiver<ApprovalResponse>)> {
        let mut state = self.state.lock();
        if state.slots.len() >= MAX_PENDING_APPROVALS {
            return Err(CoreError::CapacityExhausted);
        }
        let per_client = state.per_client_counts.get(caller).copied().unwrap_or(0);
        if per_client >= MAX_CONCURRENT_PER_CLIENT {
            return Err(CoreError::CapacityExhausted);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        state.slots.insert(
            id.clone(),
            Slot {
                caller: caller.to_string(),
                sender: Some(tx),
            },
        );
        *state.per_client_counts.entry(caller.to_string()).or_insert(0) += 1;

        let pending = PendingApproval {
            id,
            caller: caller.to_string(),
            request,
            is_connect,
            required_auth_level,
            enqueue_time: self.clock.monotonic(),
        };
        Ok((pending, rx))
    }

    /// Resolves a pending approval exactly once; a second call for the
    /// same id is a no-op and returns `false`.
    pub fn resolve(&self, id: &str, response: ApprovalResponse) -> bool {
        let mut state = self.state.lock();
        let sent = if let Some(slot) = state.slots.get_mut(id) {
            if let Some(sender) = slot.sender.take() {
                let _ = sender.send(response);
                true
            } else {
                false
            }
        } else {
            false
        };
        if sent {
            self.remove_locked(&mut state, id);
        }
        sent
    }

    /// Called by the engine after its approval-wait timeout elapses.
    /// Decrements both counters even though no response was ever sent.
    pub fn evict_timeout(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let existed = state.slots.contains_key(id);
        if existed {
            self.remove_locked(&mut state, id);
        }
        existed
    }

    fn remove_locked(&self, state: &mut RegistryState, id: &str) {
        if let Some(slot) = state.slots.remove(id) {
            if let Some(count) = state.per_client_counts.get_mut(&slot.caller) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.per_client_counts.remove(&slot.caller);
                }
            }
        }
    }

    /// Resolves every outstanding approval as `Deny` before locks are
    /// released, guaranteeing no caller is left blocked on shutdown.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let ids: Vec<String> = state.slots.keys().cloned().collect();
        for id in ids {
            if let Some(slot) = state.slots.get_mut(&id) {
                if let Some(sender) = slot.sender.take() {
                    let _ = sender.send(ApprovalResponse::Deny);
                }
            }
        }
        state.slots.clear();
        state.per_client_counts.clear();
    }

    pub fn global_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn per_client_count(&self, caller: &str) -> usize {
        self.state
            .lock()
            .per_client_counts
            .get(caller)
            .copied()
            .unwrap_or(0)
    }
}
