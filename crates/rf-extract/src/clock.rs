//! Time sources for pacing and UTC probing.
//!
//! The stage never reads the system clock directly so pacing can be driven
//! deterministically in tests with a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic clock plus a wall-clock UTC reading.
pub trait Clock {
    /// Microseconds since an arbitrary fixed origin.
    fn now_micros(&self) -> u64;

    /// Milliseconds since the Unix epoch.
    fn utc_millis(&self) -> i64;
}

/// The real system clock.
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
    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn utc_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
    utc_base_ms: i64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the UTC reading at `utc_ms` instead of the epoch.
    pub fn with_utc(utc_ms: i64) -> Self {
        Self {
            micros: Arc::default(),
            utc_base_ms: utc_ms,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }

    fn utc_millis(&self) -> i64 {
        self.utc_base_ms + (self.now_micros() / 1000) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_shares_time_between_clones() {
        let clock = ManualClock::with_utc(1_000);
        let handle = clock.clone();
        handle.advance(Duration::from_millis(250));
        assert_eq!(clock.now_micros(), 250_000);
        assert_eq!(clock.utc_millis(), 1_250);
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::default();
        let a = clock.now_micros();
        let b = clock.now_micros();
        assert!(b >= a);
        assert!(clock.utc_millis() > 0);
    }
}
