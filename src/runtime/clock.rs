//! Clocks for trace timestamps: wall-based for real runs, virtual for tests.

use std::time::{Duration, Instant, SystemTime};

pub trait Clock: Send {
    /// Milliseconds since the clock's origin.
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
    }
}

/// Manually driven clock. Each read advances by `step_ms`, so consecutive
/// trace events get distinct, reproducible timestamps.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now_ms: std::cell::Cell<u64>,
    step_ms: u64,
}

impl VirtualClock {
    pub fn new(start_ms: u64, step_ms: u64) -> Self {
        Self {
            now_ms: std::cell::Cell::new(start_ms),
            step_ms,
        }
    }

    pub fn advance(&self, d: Duration) {
        let ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
        self.now_ms.set(self.now_ms.get().saturating_add(ms));
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        let now = self.now_ms.get();
        self.now_ms.set(now.saturating_add(self.step_ms));
        now
    }
}

pub fn wall_time_iso_utc() -> String {
    // Report metadata only; never feeds shaping decisions.
    let now = SystemTime::now();
    let dt: time::OffsetDateTime = now.into();
    dt.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
