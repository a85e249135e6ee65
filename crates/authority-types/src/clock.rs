//! The `Clock` capability: wall-clock and monotonic time, injectable for
//! tests.
//!
//! Per §9's open question, persisted expiries (Permission Store rows,
//! VelocityEntry retention) compare against wall-clock `SystemTime` with a
//! backward-jump guard; in-memory windows (Rate Limiter, nonce TTLs, Risk
//! Assessor frequency windows) compare exclusively against the monotonic
//! `Instant`, which a system-clock change cannot perturb.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type WallMillis = u64;

/// Injectable time source. Production code uses [`SystemClock`]; tests use
/// [`MockClock`] to advance both clocks deterministically.
pub trait Clock: Send + Sync {
    /// Current wall-clock time, milliseconds since the Unix epoch.
    fn now_ms(&self) -> WallMillis;

    /// Current monotonic instant. Never goes backwards, unaffected by
    /// system-time changes.
    fn monotonic(&self) -> Instant;
}

/// Production clock backed by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> WallMillis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for tests. Wall time and monotonic time advance
/// together via [`MockClock::advance`]; `Instant` cannot be constructed
/// from an arbitrary value, so the monotonic side is tracked as an offset
/// from the clock's creation instant.
pub struct MockClock {
    wall_ms: std::sync::atomic::AtomicU64,
    origin: Instant,
    offset_ms: std::sync::atomic::AtomicU64,
}

impl MockClock {
    pub fn new(initial_wall_ms: WallMillis) -> Self {
        Self {
            wall_ms: std::sync::atomic::AtomicU64::new(initial_wall_ms),
            origin: Instant::now(),
            offset_ms: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Advances both the wall clock and the monotonic clock by `ms`.
    pub fn advance(&self, ms: u64) {
        self.wall_ms
            .fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
        self.offset_ms
            .fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
    }

    /// Moves the wall clock only, simulating an operator-initiated clock
    /// jump that must not grant extra rate-limit or nonce budget.
    pub fn jump_wall_clock(&self, new_wall_ms: WallMillis) {
        self.wall_ms
            .store(new_wall_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> WallMillis {
        self.wall_ms.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn monotonic(&self) -> Instant {
        let offset = self.offset_ms.load(std::sync::atomic::Ordering::SeqCst);
        self.origin + std::time::Duration::from_millis(offset)
    }
}
