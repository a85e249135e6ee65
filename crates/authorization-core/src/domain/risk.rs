//! Risk Assessor (§4.7): weighted factor scoring mapped to an advisory
//! required auth level. Frequency windows are per-caller and monotonic;
//! the tracked-package map is bounded with oldest-first eviction, the same
//! discipline the Rate Limiter uses for its client map.

use authority_types::{is_sensitive_kind, Clock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

const SENSITIVE_KIND_WEIGHT: u32 = 40;
const FIRST_TIME_KIND_WEIGHT: u32 = 15;
const HIGH_FREQUENCY_WEIGHT: u32 = 20;
const UNUSUAL_HOUR_WEIGHT: u32 = 10;
const NEW_APP_WEIGHT: u32 = 15;

const HIGH_FREQUENCY_THRESHOLD: usize = 10;
const HIGH_FREQUENCY_WINDOW: std::time::Duration = std::time::Duration::from_secs(60);
const NEW_APP_WINDOW_MS: u64 = 24 * 3_600_000;
const MAX_TRACKED_PACKAGES: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthLevel {
    Explicit,
    Biometric,
    Pin,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RiskFactors {
    pub sensitive_kind: bool,
    pub first_time_kind: bool,
    pub high_frequency: bool,
    pub unusual_hour: bool,
    pub new_app: bool,
}

impl RiskFactors {
    pub fn score(&self) -> u32 {
        let mut total = 0;
        if self.sensitive_kind {
            total += SENSITIVE_KIND_WEIGHT;
        }
        if self.first_time_kind {
            total += FIRST_TIME_KIND_WEIGHT;
        }
        if self.high_frequency {
            total += HIGH_FREQUENCY_WEIGHT;
        }
        if self.unusual_hour {
            total += UNUSUAL_HOUR_WEIGHT;
        }
        if self.new_app {
            total += NEW_APP_WEIGHT;
        }
        total.min(100)
    }

    pub fn auth_level(&self) -> AuthLevel {
        let score = self.score();
        if score >= 60 {
            AuthLevel::Explicit
        } else if score >= 40 {
            AuthLevel::Biometric
        } else if score >= 20 {
            AuthLevel::Pin
        } else {
            AuthLevel::None
        }
    }
}

struct PackageState {
    first_seen_ms: u64,
    seen_kinds: HashSet<u16>,
    recent_requests: VecDeque<Instant>,
    last_activity: Instant,
}

/// Advisory-only: the required auth level is attached to the
/// `PendingApproval`; actual auth gating lives outside the core.
pub struct RiskAssessor {
    packages: parking_lot::Mutex<HashMap<String, PackageState>>,
    clock: Arc<dyn Clock>,
}

impl RiskAssessor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            packages: parking_lot::Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Scores one request and records it into the caller's tracking state.
    pub fn assess(&self, caller: &str, event_kind: Option<u16>) -> RiskFactors {
        let now_ms = self.clock.now_ms();
        let now_mono = self.clock.monotonic();
        let mut packages = self.packages.lock();

        if !packages.contains_key(caller) && packages.len() >= MAX_TRACKED_PACKAGES {
            if let Some(oldest) = packages
                .iter()
                .min_by_key(|(_, s)| s.last_activity)
                .map(|(k, _)| k.clone())
            {
                packages.remove(&oldest);
            }
        }

        let state = packages.entry(caller.to_string()).or_insert_with(|| PackageState {
            first_seen_ms: now_ms,
            seen_kinds: HashSet::new(),
            recent_requests: VecDeque::new(),
            last_activity: now_mono,
        });

        let new_app = now_ms.saturating_sub(state.first_seen_ms) < NEW_APP_WINDOW_MS;

        while let Some(front) = state.recent_requests.front() {
            if now_mono.duration_since(*front) > HIGH_FREQUENCY_WINDOW {
                state.recent_requests.pop_front();
            } else {
                break;
            }
        }
        let high_frequency = state.recent_requests.len() > HIGH_FREQUENCY_THRESHOLD;
        state.recent_requests.push_back(now_mono);
        state.last_activity = now_mono;

        let first_time_kind = match event_kind {
            Some(kind) => state.seen_kinds.insert(kind),
            None => false,
        };

        let hour_of_day = (now_ms / 3_600_000) % 24;
        let unusual_hour = hour_of_day < 6 || hour_of_day >= 23;

        RiskFactors {
            sensitive_kind: event_kind.map(is_sensitive_kind).unwrap_or(false),
            first_time_kind,
            high_frequency,
            unusual_hour,
            new_app,
        }
    }
}
