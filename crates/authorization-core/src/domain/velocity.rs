//! Velocity Tracker (§4.5): rolling per-caller counters over hour/day/week
//! windows, backed by persistent `VelocityEntry` rows on the
//! `KeyValueStore` port (§2a).

use authority_types::{BatchOperation, Clock, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::errors::CoreResult;

const HOUR_MS: u64 = 3_600_000;
const DAY_MS: u64 = HOUR_MS * 24;
const WEEK_MS: u64 = DAY_MS * 7;

pub const DEFAULT_HOURLY_LIMIT: u32 = 100;
pub const DEFAULT_DAILY_LIMIT: u32 = 500;
pub const DEFAULT_WEEKLY_LIMIT: u32 = 2_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VelocityEntry {
    pub id: String,
    pub caller: String,
    pub timestamp_ms: u64,
    pub event_kind: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VelocityOutcome {
    Allowed,
    Blocked { reason: VelocityWindow, reset_at_ms: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VelocityWindow {
    Hour,
    Day,
    Week,
}

pub struct VelocityLimits {
    pub hourly: u32,
    pub daily: u32,
    pub weekly: u32,
}

impl Default for VelocityLimits {
    fn default() -> Self {
        Self {
            hourly: DEFAULT_HOURLY_LIMIT,
            daily: DEFAULT_DAILY_LIMIT,
            weekly: DEFAULT_WEEKLY_LIMIT,
        }
    }
}

fn entry_key(caller: &str, timestamp_ms: u64, id: &str) -> Vec<u8> {
    format!("velocity:{caller}:{timestamp_ms:020}:{id}").into_bytes()
}

fn caller_prefix(caller: &str) -> Vec<u8> {
    format!("velocity:{caller}:").into_bytes()
}

/// Tracks request counts per caller over hour/day/week windows. Check
/// order is hour → day → week, returning on the first breach; on pass, a
/// new `VelocityEntry` is inserted and entries older than a week deleted,
/// all within one `atomic_batch_write` call (§5 transaction requirement).
pub struct VelocityTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    limits: VelocityLimits,
}

impl VelocityTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            limits: VelocityLimits::default(),
        }
    }

    pub fn with_limits(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, limits: VelocityLimits) -> Self {
        Self { store, clock, limits }
    }

    fn entries_for(&self, caller: &str) -> CoreResult<Vec<VelocityEntry>> {
        let rows = self.store.prefix_scan(&caller_prefix(caller))?;
        Ok(rows
            .into_iter()
            .filter_map(|(_, v)| bincode::deserialize::<VelocityEntry>(&v).ok())
            .collect())
    }

    pub fn check_and_record(&self, caller: &str, event_kind: Option<u16>) -> CoreResult<VelocityOutcome> {
        let now_ms = self.clock.now_ms();
        let entries = self.entries_for(caller)?;

        let count_since = |cutoff: u64| entries.iter().filter(|e| e.timestamp_ms >= cutoff).count() as u32;

        let hourly_count = count_since(now_ms.saturating_sub(HOUR_MS));
        if hourly_count >= self.limits.hourly {
            return Ok(VelocityOutcome::Blocked {
                reason: VelocityWindow::Hour,
                reset_at_ms: now_ms + HOUR_MS,
            });
        }
        let daily_count = count_since(now_ms.saturating_sub(DAY_MS));
        if daily_count >= self.limits.daily {
            return Ok(VelocityOutcome::Blocked {
                reason: VelocityWindow::Day,
                reset_at_ms: now_ms + DAY_MS,
            });
        }
        let weekly_count = count_since(now_ms.saturating_sub(WEEK_MS));
        if weekly_count >= self.limits.weekly {
            return Ok(VelocityOutcome::Blocked {
                reason: VelocityWindow::Week,
                reset_at_ms: now_ms + WEEK_MS,
            });
        }

        let new_entry = VelocityEntry {
            id: uuid::Uuid::new_v4().to_string(),
            caller: caller.to_string(),
            timestamp_ms: now_ms,
            event_kind,
        };
        let bytes = bincode::serialize(&new_entry).map_err(|e| super::errors::CoreError::DependencyUnavailable {
            reason: e.to_string(),
        })?;

        let mut ops = vec![BatchOperation::put(
            entry_key(caller, new_entry.timestamp_ms, &new_entry.id),
            bytes,
        )];
        let week_cutoff = now_ms.saturating_sub(WEEK_MS);
        for entry in &entries {
            if entry.timestamp_ms < week_cutoff {
                ops.push(BatchOperation::delete(entry_key(
                    &entry.caller,
                    entry.timestamp_ms,
                    &entry.id,
                )));
            }
        }
        self.store.atomic_batch_write(ops)?;
        Ok(VelocityOutcome::Allowed)
    }
}
