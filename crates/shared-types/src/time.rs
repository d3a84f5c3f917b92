//! # Time
//!
//! Injected time source. Deadlines, receipt numbers and audit timestamps all
//! derive from a [`Clock`] so that expiry behavior is reproducible in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unix epoch milliseconds, UTC.
pub type TimestampMs = u64;

/// Milliseconds in one second.
pub const SECOND_MS: u64 = 1_000;

/// Milliseconds in one minute.
pub const MINUTE_MS: u64 = 60 * SECOND_MS;

/// Milliseconds in one hour.
pub const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Time source injected into every component that reads the clock.
pub trait Clock: Send + Sync {
    /// Current time as unix epoch milliseconds.
    fn now_ms(&self) -> TimestampMs;
}

/// Default clock backed by system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for tests.
///
/// Starts at an arbitrary fixed instant and only moves when advanced.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock pinned at `start_ms`.
    pub fn at(start_ms: TimestampMs) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump to an absolute instant. Never moves backwards.
    pub fn set(&self, instant_ms: TimestampMs) {
        self.now.fetch_max(instant_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> TimestampMs {
        self.now.load(Ordering::SeqCst)
    }
}
