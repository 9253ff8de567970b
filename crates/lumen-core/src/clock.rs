#![forbid(unsafe_code)]

//! Time sources for the event loop.
//!
//! The loop asks a [`TimeSource`] for "now" whenever it decides which timers
//! are due. In production that is `web_time::Instant::now()`. Tests hand the
//! loop a [`LabClock`] instead and advance it explicitly, which makes debounce
//! windows and timer ordering fully reproducible.
//!
//! # Example
//!
//! ```
//! use lumen_core::clock::{LabClock, TimeSource};
//! use web_time::Duration;
//!
//! let clock = LabClock::new();
//! let source = TimeSource::Lab(clock.clone());
//! let before = source.now();
//! clock.advance(Duration::from_millis(250));
//! assert_eq!(source.now() - before, Duration::from_millis(250));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use web_time::{Duration, Instant};

// ─── LabClock ────────────────────────────────────────────────────────────────

/// A manually-advanceable clock for deterministic tests.
///
/// Clones share the same offset, so every loop and timer built from the same
/// `LabClock` sees the same time.
#[derive(Debug, Clone)]
pub struct LabClock {
    epoch: Instant,
    offset_us: Arc<AtomicU64>,
}

impl LabClock {
    /// Create a new lab clock starting at `Instant::now()`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_us: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the lab clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let us = delta.as_micros().min(u64::MAX as u128) as u64;
        self.offset_us.fetch_add(us, Ordering::Release);
    }

    /// Current lab time.
    #[must_use]
    pub fn now(&self) -> Instant {
        let offset = Duration::from_micros(self.offset_us.load(Ordering::Acquire));
        self.epoch + offset
    }

    /// Total time advanced since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.offset_us.load(Ordering::Acquire))
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── TimeSource ──────────────────────────────────────────────────────────────

/// Where the event loop reads the current time from.
#[derive(Debug, Clone, Default)]
pub enum TimeSource {
    /// Real wall-clock time.
    #[default]
    Real,
    /// Deterministic lab clock for testing.
    Lab(LabClock),
}

impl TimeSource {
    /// Current time according to this source.
    #[must_use]
    pub fn now(&self) -> Instant {
        match self {
            Self::Real => Instant::now(),
            Self::Lab(clock) => clock.now(),
        }
    }

    /// Whether this source is a lab clock.
    #[inline]
    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self, Self::Lab(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_clock_starts_at_zero_offset() {
        let clock = LabClock::new();
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn lab_clock_clones_share_time() {
        let a = LabClock::new();
        let b = a.clone();
        a.advance(Duration::from_millis(40));
        assert_eq!(b.elapsed(), Duration::from_millis(40));
        assert_eq!(a.now(), b.now());
    }

    #[test]
    fn lab_source_is_lab() {
        assert!(TimeSource::Lab(LabClock::new()).is_lab());
        assert!(!TimeSource::Real.is_lab());
    }

    #[test]
    fn real_source_is_monotonic() {
        let source = TimeSource::Real;
        let a = source.now();
        let b = source.now();
        assert!(b >= a);
    }
}
