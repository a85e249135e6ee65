//! NIP-46 Session Manager (§4.9): the authorized-client state machine,
//! persistent `authorized_clients` set, and the bounded nostrconnect
//! offer queue.
//!
//! ```text
//! NEW ──connect approved──▶ AUTHORIZED ──revoke──▶ REMOVED
//!  │                              │
//!  └──connect denied──▶ NEW       └──request allowed/denied──▶ AUTHORIZED
//! ```

use authority_types::KeyValueStore;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

use super::errors::CoreResult;
use super::permission::PermissionStore;

const MAX_QUEUED_CONNECT_REQUESTS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    New,
    Authorized,
    Removed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NostrConnectRequest {
    pub client_pubkey: String,
    pub relays: Vec<String>,
    pub secret: String,
}

fn authorized_key(pubkey: &str) -> Vec<u8> {
    format!("nip46:auth:{pubkey}").into_bytes()
}

fn removed_key(pubkey: &str) -> Vec<u8> {
    format!("nip46:removed:{pubkey}").into_bytes()
}

/// Canonical caller string for a NIP-46 client, per §3: `"nip46:" + pubkey`.
pub fn canonical_caller(pubkey: &str) -> String {
    format!("nip46:{pubkey}")
}

pub struct Nip46SessionManager {
    store: Arc<dyn KeyValueStore>,
    queue: parking_lot::Mutex<VecDeque<NostrConnectRequest>>,
}

impl Nip46SessionManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            queue: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    pub fn state(&self, pubkey: &str) -> CoreResult<ClientState> {
        if self.store.exists(&authorized_key(pubkey))? {
            return Ok(ClientState::Authorized);
        }
        if self.store.exists(&removed_key(pubkey))? {
            return Ok(ClientState::Removed);
        }
        Ok(ClientState::New)
    }

    pub fn is_authorized(&self, pubkey: &str) -> CoreResult<bool> {
        self.store.exists(&authorized_key(pubkey)).map_err(Into::into)
    }

    /// Adds `pubkey` to `authorized_clients`. Idempotent (§8 invariant 8).
    pub fn authorize(&self, pubkey: &str) -> CoreResult<()> {
        self.store.put(&authorized_key(pubkey), b"1")?;
        self.store.delete(&removed_key(pubkey))?;
        Ok(())
    }

    /// Removes `pubkey` from `authorized_clients` and all of its grants
    /// from the Permission Store, in one logical transaction (§4.9).
    pub fn revoke(&self, pubkey: &str, permissions: &PermissionStore) -> CoreResult<()> {
        let caller = canonical_caller(pubkey);
        permissions.revoke_all(&caller)?;
        self.store.delete(&authorized_key(pubkey))?;
        self.store.put(&removed_key(pubkey), b"1")?;
        Ok(())
    }

    pub fn authorized_clients(&self) -> CoreResult<Vec<String>> {
        let rows = self.store.prefix_scan(b"nip46:auth:")?;
        Ok(rows
            .into_iter()
            .filter_map(|(k, _)| {
                String::from_utf8(k)
                    .ok()
                    .and_then(|s| s.strip_prefix("nip46:auth:").map(str::to_string))
            })
            .collect())
    }

    /// Offers a `nostrconnect://` request for later delivery. Returns
    /// `false` on overflow (bounded FIFO, size 10). A lightweight
    /// persistence touch backs the offer so a storage failure rolls the
    /// item back out instead of leaving a half-queued entry (§4.9
    /// compensating-transaction property).
    pub fn offer_connect_request(&self, request: NostrConnectRequest) -> CoreResult<bool> {
        let marker_key = format!("nip46:queued:{}", request.client_pubkey).into_bytes();
        if let Err(err) = self.store.put(&marker_key, b"1") {
            warn!(error = %err, "nostrconnect queue marker write failed, dropping offer");
            return Ok(false);
        }
        let mut queue = self.queue.lock();
        if queue.len() >= MAX_QUEUED_CONNECT_REQUESTS {
            drop(queue);
            let _ = self.store.delete(&marker_key);
            return Ok(false);
        }
        queue.push_back(request);
        Ok(true)
    }

    /// Drains every queued request in FIFO order for the transport to
    /// attempt delivery on. A transport lacking the capability to send is
    /// a benign, logged failure, not a queue re-insertion.
    pub fn drain_connect_requests(&self) -> Vec<NostrConnectRequest> {
        let mut queue = self.queue.lock();
        let drained: Vec<_> = queue.drain(..).collect();
        drop(queue);
        for request in &drained {
            let marker_key = format!("nip46:queued:{}", request.client_pubkey).into_bytes();
            let _ = self.store.delete(&marker_key);
        }
        drained
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authority_types::{Clock, InMemoryKvStore, SystemClock};

    fn manager() -> Nip46SessionManager {
        Nip46SessionManager::new(Arc::new(InMemoryKvStore::new()))
    }

    fn permission_store(kv: Arc<dyn KeyValueStore>) -> PermissionStore {
        PermissionStore::new(kv, Arc::new(SystemClock) as Arc<dyn Clock>)
    }

    #[test]
    fn new_client_state_is_new() {
        let manager = manager();
        assert_eq!(manager.state("a".repeat(64).as_str()).unwrap(), ClientState::New);
    }

    #[test]
    fn authorize_then_state_is_authorized() {
        let manager = manager();
        let pubkey = "a".repeat(64);
        manager.authorize(&pubkey).unwrap();
        assert_eq!(manager.state(&pubkey).unwrap(), ClientState::Authorized);
        assert!(manager.authorized_clients().unwrap().contains(&pubkey));
    }

    #[test]
    fn authorize_is_idempotent() {
        let manager = manager();
        let pubkey = "a".repeat(64);
        manager.authorize(&pubkey).unwrap();
        manager.authorize(&pubkey).unwrap();
        assert_eq!(manager.authorized_clients().unwrap().len(), 1);
    }

    #[test]
    fn revoke_removes_client_and_its_permissions() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let manager = Nip46SessionManager::new(kv.clone());
        let permissions = permission_store(kv);
        let pubkey = "a".repeat(64);
        manager.authorize(&pubkey).unwrap();
        permissions
            .grant(
                &canonical_caller(&pubkey),
                authority_types::RequestType::SignEvent,
                1,
                super::super::permission::GrantDuration::OneHour,
            )
            .unwrap();

        manager.revoke(&pubkey, &permissions).unwrap();
        assert_eq!(manager.state(&pubkey).unwrap(), ClientState::Removed);
        assert!(permissions.list_for(&canonical_caller(&pubkey)).unwrap().is_empty());
    }

    #[test]
    fn offer_rejects_past_capacity() {
        let manager = manager();
        for i in 0..MAX_QUEUED_CONNECT_REQUESTS {
            let req = NostrConnectRequest {
                client_pubkey: format!("{i:064}"),
                relays: vec!["wss://relay.example".to_string()],
                secret: "abc".to_string(),
            };
            assert!(manager.offer_connect_request(req).unwrap());
        }
        let overflow = NostrConnectRequest {
            client_pubkey: "overflow".to_string(),
            relays: vec![],
            secret: "abc".to_string(),
        };
        assert!(!manager.offer_connect_request(overflow).unwrap());
    }

    #[test]
    fn drain_returns_in_fifo_order() {
        let manager = manager();
        for i in 0..3 {
            manager
                .offer_connect_request(NostrConnectRequest {
                    client_pubkey: format!("{i:064}"),
                    relays: vec![],
                    secret: "abc".to_string(),
                })
                .unwrap();
        }
        let drained = manager.drain_connect_requests();
        assert_eq!(drained[0].client_pubkey, format!("{:064}", 0));
        assert_eq!(manager.queued_len(), 0);
    }
}
