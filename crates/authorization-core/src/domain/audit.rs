//! Tamper-evident Audit Chain (§4.3): an append-only, HMAC-chained event
//! log with verification, built on the HMAC primitive in
//! [`authority_types::security`] and the `KeyValueStore` port for
//! persistence ordering.

use authority_types::{hmac_hex, BatchOperation, Clock, KeyValueStore, RequestType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::errors::{CoreError, CoreResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditDecision {
    Allow,
    Deny,
}

impl AuditDecision {
    fn as_str(self) -> &'static str {
        match self {
            AuditDecision::Allow => "allow",
            AuditDecision::Deny => "deny",
        }
    }
}

/// One row of the audit chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub seq: u64,
    pub timestamp_ms: u64,
    pub caller: String,
    pub request_type: String,
    pub event_kind: Option<u16>,
    pub decision: AuditDecision,
    pub was_automatic: bool,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

impl AuditEntry {
    fn hash_message(
        previous_hash: &Option<String>,
        caller: &str,
        request_type: &str,
        event_kind: Option<u16>,
        decision: AuditDecision,
        timestamp_ms: u64,
        was_automatic: bool,
    ) -> Vec<u8> {
        let kind_str = event_kind.map(|k| k.to_string()).unwrap_or_default();
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            previous_hash.as_deref().unwrap_or(""),
            caller,
            request_type,
            kind_str,
            decision.as_str(),
            timestamp_ms,
            was_automatic,
        )
        .into_bytes()
    }

    fn recompute_hash(&self, key: &[u8]) -> String {
        let message = Self::hash_message(
            &self.previous_hash,
            &self.caller,
            &self.request_type,
            self.event_kind,
            self.decision,
            self.timestamp_ms,
            self.was_automatic,
        );
        hmac_hex(key, &message)
    }
}

/// Outcome of [`AuditChain::verify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    /// The chain is valid; the first `n` entries predate hash-chaining and
    /// carry no `entry_hash` (legacy rows).
    PartiallyVerified(usize),
    /// The earliest present entry's `previous_hash` refers to a row that no
    /// longer exists, but its own hash recomputes correctly -- consistent
    /// with an authorized prune (§4.3 "pruned-tail").
    Truncated(String),
    /// An entry's link to its predecessor is broken (e.g. a row was
    /// deleted out of band) but the entry's own hash is internally
    /// consistent.
    Broken(String),
    /// An entry's stored `entry_hash` does not match what its fields
    /// recompute to -- the row itself was altered after the fact.
    Tampered(String),
}

struct ChainState {
    next_seq: u64,
    last_hash: Option<String>,
}

fn entry_key(seq: u64) -> Vec<u8> {
    format!("audit:e:{seq:020}").into_bytes()
}

const ENTRY_PREFIX: &[u8] = b"audit:e:";

/// Marks the synthetic caller used for prune-boundary marker entries. Never
/// a real caller identity, so it cannot collide with `CallerIdentity`'s
/// canonical forms (`name` or `"nip46:" + pubkey`).
const PRUNE_MARKER_CALLER: &str = "system:audit-prune";

pub struct AuditChain {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    hmac_key: Vec<u8>,
    state: parking_lot::Mutex<ChainState>,
}

impl AuditChain {
    /// Scans existing rows once at construction to recover `next_seq` and
    /// the tip hash, so subsequent appends never need a full scan.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, hmac_key: Vec<u8>) -> CoreResult<Self> {
        let mut rows = store.prefix_scan(ENTRY_PREFIX)?;
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        let last_hash = rows
            .last()
            .and_then(|(_, v)| bincode::deserialize::<AuditEntry>(v).ok())
            .map(|e| e.entry_hash);
        let next_seq = rows.len() as u64;
        Ok(Self {
            store,
            clock,
            hmac_key,
            state: parking_lot::Mutex::new(ChainState { next_seq, last_hash }),
        })
    }

    /// Appends one entry. Must be called inside the same transaction as
    /// the caller's state mutation whenever one exists (§5); callers
    /// achieve this by calling `append` directly after their own
    /// `KeyValueStore` write under the same external guard, since both
    /// ultimately serialize through this chain's internal lock.
    pub fn append(
        &self,
        caller: &str,
        request_type: RequestType,
        event_kind: Option<u16>,
        decision: AuditDecision,
        was_automatic: bool,
    ) -> CoreResult<AuditEntry> {
        let timestamp_ms = self.clock.now_ms();
        let mut state = self.state.lock();
        let previous_hash = state.last_hash.clone();
        let message = AuditEntry::hash_message(
            &previous_hash,
            caller,
            request_type.as_str(),
            event_kind,
            decision,
            timestamp_ms,
            was_automatic,
        );
        let entry_hash = hmac_hex(&self.hmac_key, &message);
        let entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            seq: state.next_seq,
            timestamp_ms,
            caller: caller.to_string(),
            request_type: request_type.as_str().to_string(),
            event_kind,
            decision,
            was_automatic,
            previous_hash,
            entry_hash: entry_hash.clone(),
        };
        let bytes = bincode::serialize(&entry).map_err(|e| CoreError::DependencyUnavailable {
            reason: e.to_string(),
        })?;
        self.store.put(&entry_key(entry.seq), &bytes)?;
        state.next_seq += 1;
        state.last_hash = Some(entry_hash);
        Ok(entry)
    }

    fn all_entries_sorted(&self) -> CoreResult<Vec<AuditEntry>> {
        let mut rows = self.store.prefix_scan(ENTRY_PREFIX)?;
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        let mut entries = Vec::with_capacity(rows.len());
        for (_, v) in rows {
            let entry: AuditEntry =
                bincode::deserialize(&v).map_err(|e| CoreError::DependencyUnavailable {
                    reason: e.to_string(),
                })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// §4.3 verification rule. `entry_hash` and `previous_hash` are
    /// compared with `constant_time_eq`.
    pub fn verify(&self) -> CoreResult<VerifyOutcome> {
        let entries = self.all_entries_sorted()?;
        let mut legacy_count = 0usize;
        let mut iter = entries.iter();
        let mut first_verified: Option<&AuditEntry> = None;
        for entry in iter.by_ref() {
            if entry.entry_hash.is_empty() {
                legacy_count += 1;
                continue;
            }
            let recomputed = entry.recompute_hash(&self.hmac_key);
            if !authority_types::constant_time_eq(&recomputed, &entry.entry_hash) {
                return Ok(VerifyOutcome::Broken(entry.id.clone()));
            }
            if entry.previous_hash.is_some() {
                // No earlier entry is known to us (either genuinely first,
                // or the true predecessor was pruned away).
                return Ok(VerifyOutcome::Truncated(entry.id.clone()));
            }
            first_verified = Some(entry);
            break;
        }
        let Some(mut prev) = first_verified else {
            return Ok(if legacy_count > 0 {
                VerifyOutcome::PartiallyVerified(legacy_count)
            } else {
                VerifyOutcome::Valid
            });
        };
        for entry in iter {
            let recomputed = entry.recompute_hash(&self.hmac_key);
            if !authority_types::constant_time_eq(&recomputed, &entry.entry_hash) {
                return Ok(VerifyOutcome::Tampered(entry.id.clone()));
            }
            let linked = entry
                .previous_hash
                .as_deref()
                .map(|h| authority_types::constant_time_eq(h, &prev.entry_hash))
                .unwrap_or(false);
            if !linked {
                return Ok(VerifyOutcome::Broken(entry.id.clone()));
            }
            prev = entry;
        }
        Ok(if legacy_count > 0 {
            VerifyOutcome::PartiallyVerified(legacy_count)
        } else {
            VerifyOutcome::Valid
        })
    }

    /// Deletes entries older than `max_age_ms`, after appending a
    /// distinguished marker entry so the deletion is itself auditable and
    /// the chain tip remains unbroken (§4.3 retention rule).
    pub fn prune(&self, max_age_ms: u64) -> CoreResult<usize> {
        let now_ms = self.clock.now_ms();
        let cutoff = now_ms.saturating_sub(max_age_ms);
        self.append(
            PRUNE_MARKER_CALLER,
            RequestType::GetPublicKey,
            None,
            AuditDecision::Deny,
            true,
        )?;
        let rows = self.store.prefix_scan(ENTRY_PREFIX)?;
        let mut ops = Vec::new();
        for (key, value) in &rows {
            if let Ok(entry) = bincode::deserialize::<AuditEntry>(value) {
                if entry.timestamp_ms < cutoff && entry.caller != PRUNE_MARKER_CALLER {
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

    /// §6: audit log export, bounded and filterable. Not part of the
    /// engine's own decision path.
    pub fn get_page(
        &self,
        limit: usize,
        offset: usize,
        filter_caller: Option<&str>,
    ) -> CoreResult<Vec<AuditEntry>> {
        let limit = limit.min(100);
        let entries = self.all_entries_sorted()?;
        let filtered: Vec<AuditEntry> = entries
            .into_iter()
            .filter(|e| filter_caller.map(|c| e.caller == c).unwrap_or(true))
            .collect();
        Ok(filtered.into_iter().skip(offset).take(limit).collect())
    }
}
