//! Rate Limiter (§4.4): in-memory per-client and global request windows
//! with exponential back-off. Fine-grained per-resource locks and an
//! `Outcome`-style return instead of a bare bool; the algorithm is a
//! sliding window with back-off rather than a token bucket.

use authority_types::Clock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

const RATE_LIMIT_WINDOW: std::time::Duration = std::time::Duration::from_secs(60);
const PER_CLIENT_CAP: usize = 30;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_MAX_MS: u64 = 60_000;
const BACKOFF_SHIFT_CAP: u32 = 6;
const MAX_CONSECUTIVE_OVERFLOWS: u32 = 7;
const GLOBAL_CAP: usize = 100;
const GLOBAL_DEQUE_CAP: usize = 200;
const MAX_TRACKED_CLIENTS: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed,
    Limited { retry_after_ms: u64 },
}

struct RateLimitBucket {
    request_history: VecDeque<Instant>,
    backoff_until: Option<Instant>,
    consecutive_overflows: u32,
    last_activity: Instant,
}

impl RateLimitBucket {
    fn new(now: Instant) -> Self {
        Self {
            request_history: VecDeque::new(),
            backoff_until: None,
            consecutive_overflows: 0,
            last_activity: now,
        }
    }

    fn trim(&mut self, now: Instant) {
        while let Some(front) = self.request_history.front() {
            if now.duration_since(*front) > RATE_LIMIT_WINDOW {
                self.request_history.pop_front();
            } else {
                break;
            }
        }
    }

    fn back_off(&mut self, now: Instant) -> u64 {
        self.consecutive_overflows = (self.consecutive_overflows + 1).min(MAX_CONSECUTIVE_OVERFLOWS);
        let shift = self.consecutive_overflows.saturating_sub(1).min(BACKOFF_SHIFT_CAP);
        let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1u64 << shift).min(BACKOFF_MAX_MS);
        self.backoff_until = Some(now + std::time::Duration::from_millis(backoff_ms));
        backoff_ms
    }
}

/// Per-client fine-grained locks plus one global lock on the shared deque,
/// per §5's shared-resource discipline. All timers are monotonic; system
/// clock changes never grant or remove budget.
pub struct RateLimiter {
    clients: parking_lot::Mutex<HashMap<String, RateLimitBucket>>,
    global: parking_lot::Mutex<VecDeque<Instant>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clients: parking_lot::Mutex::new(HashMap::new()),
            global: parking_lot::Mutex::new(VecDeque::new()),
            clock,
        }
    }

    /// Checks and, if admitted, records one request for `caller`. Runs the
    /// per-client window first, then the global window; either can deny.
    pub fn check(&self, caller: &str) -> RateLimitOutcome {
        let now = self.clock.monotonic();
        if let RateLimitOutcome::Limited { retry_after_ms } = self.check_client(caller, now) {
            return RateLimitOutcome::Limited { retry_after_ms };
        }
        self.check_global(now)
    }

    fn check_client(&self, caller: &str, now: Instant) -> RateLimitOutcome {
        let mut clients = self.clients.lock();
        if !clients.contains_key(caller) && clients.len() >= MAX_TRACKED_CLIENTS {
            if let Some(oldest) = clients
                .iter()
                .min_by_key(|(_, bucket)| bucket.last_activity)
                .map(|(k, _)| k.clone())
            {
                clients.remove(&oldest);
            }
        }
        let bucket = clients
            .entry(caller.to_string())
            .or_insert_with(|| RateLimitBucket::new(now));
        bucket.last_activity = now;
        bucket.trim(now);

        if let Some(backoff_until) = bucket.backoff_until {
            if now < backoff_until {
                let retry_after_ms = bucket.back_off(now);
                return RateLimitOutcome::Limited { retry_after_ms };
            }
        }

        if bucket.request_history.len() >= PER_CLIENT_CAP {
            let retry_after_ms = bucket.back_off(now);
            return RateLimitOutcome::Limited { retry_after_ms };
        }

        bucket.request_history.push_back(now);
        RateLimitOutcome::Allowed
    }

    fn check_global(&self, now: Instant) -> RateLimitOutcome {
        let mut global = self.global.lock();
        while let Some(front) = global.front() {
            if now.duration_since(*front) > RATE_LIMIT_WINDOW {
                global.pop_front();
            } else {
                break;
            }
        }
        if global.len() >= GLOBAL_CAP {
            return RateLimitOutcome::Limited {
                retry_after_ms: BACKOFF_BASE_MS,
            };
        }
        global.push_back(now);
        while global.len() > GLOBAL_DEQUE_CAP {
            global.pop_front();
        }
        RateLimitOutcome::Allowed
    }

    /// Resets `consecutive_overflows` for `caller` after a successful
    /// user-approved request (§4.4).
    pub fn reset_backoff(&self, caller: &str) {
        if let Some(bucket) = self.clients.lock().get_mut(caller) {
            bucket.consecutive_overflows = 0;
            bucket.backoff_until = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authority_types::SystemClock;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(SystemClock))
    }

    #[test]
    fn admits_requests_under_cap() {
        let limiter = limiter();
        for _ in 0..PER_CLIENT_CAP {
            assert_eq!(limiter.check("c"), RateLimitOutcome::Allowed);
        }
    }

    #[test]
    fn thirty_first_request_is_limited_with_one_second_backoff() {
        let limiter = limiter();
        for _ in 0..PER_CLIENT_CAP {
            limiter.check("c");
        }
        match limiter.check("c") {
            RateLimitOutcome::Limited { retry_after_ms } => assert_eq!(retry_after_ms, 1_000),
            RateLimitOutcome::Allowed => panic!("expected Limited"),
        }
    }

    #[test]
    fn repeated_overflow_caps_backoff_at_sixty_seconds() {
        let limiter = limiter();
        for _ in 0..PER_CLIENT_CAP {
            limiter.check("c");
        }
        let mut last_backoff = 0;
        for _ in 0..10 {
            if let RateLimitOutcome::Limited { retry_after_ms } = limiter.check("c") {
                last_backoff = retry_after_ms;
            }
        }
        assert!(last_backoff <= BACKOFF_MAX_MS);
        assert_eq!(last_backoff, BACKOFF_MAX_MS);
    }

    #[test]
    fn reset_backoff_clears_overflow_state() {
        let limiter = limiter();
        for _ in 0..PER_CLIENT_CAP + 1 {
            limiter.check("c");
        }
        limiter.reset_backoff("c");
        let clients = limiter.clients.lock();
        let bucket = clients.get("c").unwrap();
        assert_eq!(bucket.consecutive_overflows, 0);
        assert!(bucket.backoff_until.is_none());
    }

    #[test]
    fn global_cap_rejects_all_callers() {
        let limiter = limiter();
        for i in 0..GLOBAL_CAP {
            let caller = format!("c{i}");
            assert_eq!(limiter.check(&caller), RateLimitOutcome::Allowed);
        }
        match limiter.check("one-more") {
            RateLimitOutcome::Limited { .. } => {}
            RateLimitOutcome::Allowed => panic!("expected global cap to reject"),
        }
    }
}
