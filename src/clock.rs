//! A minimal injectable clock: real time in production, an advanceable
//! mock in tests. Time consumers (`task::TaskManager`'s timer thread,
//! `config::Timestamp::now`) block synchronously, so `sleep` here just
//! blocks the calling thread rather than returning a pollable future.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic instant, wrapping `std::time::Instant` so callers depend on
/// this crate's abstraction rather than the standard library directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicTimePoint(Instant);

impl MonotonicTimePoint {
    pub fn now() -> Self {
        MonotonicTimePoint(Instant::now())
    }

    pub fn elapsed(self) -> Duration {
        self.0.elapsed()
    }

    pub fn duration_since(self, earlier: MonotonicTimePoint) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

/// Injectable time source. Production code uses [`SystemClock`]; tests that
/// need deterministic timer-thread and config-timestamp behavior use
/// [`MockClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> MonotonicTimePoint;
    fn sleep(&self, duration: Duration);

    /// Wall-clock milliseconds, the time base [`crate::config::Timestamp`]
    /// and the task timer's due-time comparisons are drawn from.
    fn now_millis(&self) -> u64;
}

/// Delegates to the real OS clock and a blocking thread sleep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> MonotonicTimePoint {
        MonotonicTimePoint::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock advanced explicitly by the test driving it; `sleep` blocks until
/// [`MockClock::advance`] has moved the clock past the requested duration.
pub struct MockClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    pub fn new() -> Self {
        Self { base: Instant::now(), offset_ms: AtomicU64::new(0) }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    fn elapsed_ms(&self) -> u64 {
        self.offset_ms.load(Ordering::SeqCst)
    }
}

impl Clock for MockClock {
    fn now(&self) -> MonotonicTimePoint {
        MonotonicTimePoint(self.base + Duration::from_millis(self.elapsed_ms()))
    }

    fn sleep(&self, duration: Duration) {
        let deadline = self.elapsed_ms() + duration.as_millis() as u64;
        while self.elapsed_ms() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// The mock's own offset, not an OS wall-clock reading: deterministic,
    /// and only moves when [`MockClock::advance`] is called.
    fn now_millis(&self) -> u64 {
        self.elapsed_ms()
    }
}

/// Shared handle to whichever [`Clock`] implementation a [`crate::Context`]
/// was built with.
pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_now_millis_only_advances_when_told() {
        let clock = MockClock::new();
        assert_eq!(clock.now_millis(), 0);
        clock.advance(Duration::from_millis(50));
        assert_eq!(clock.now_millis(), 50);
    }

    #[test]
    fn mock_clock_only_advances_when_told() {
        let clock = MockClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(Duration::from_millis(50));
        assert!(clock.now() > t0);
    }
}
