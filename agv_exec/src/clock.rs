//! # Clock module
//!
//! All timing in the AGV is done in whole milliseconds read from a [`Clock`]. The executable uses
//! [`SystemClock`], tests use [`ManualClock`] so that timeouts can be stepped through without
//! sleeping.
//!
//! Waiting is always bounded. Per-tick waits (inside the navigation states) use [`BoundedWait`],
//! blocking waits (mission selection) use [`poll_until`], which also re-checks an abort condition
//! on every attempt.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A source of monotonic time.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since the clock's epoch.
    fn now_ms(&self) -> u64;

    /// Block the calling thread for the given number of milliseconds.
    fn sleep_ms(&self, ms: u64);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Wall clock backed by [`Instant`], with the epoch at creation.
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,
}

/// A clock which only moves when told to.
///
/// Sleeping on a manual clock advances it by the sleep duration and returns immediately.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

/// A deadline measured from the moment a wait started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedWait {
    start_ms: u64,
    timeout_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Result of a blocking [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition became true
    Met,

    /// All attempts were used without the condition becoming true
    Exhausted,

    /// The abort condition became true before the wait condition
    Aborted,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms))
    }
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms)
    }
}

impl BoundedWait {
    /// Start a wait at `now_ms` which expires once more than `timeout_ms` have passed.
    pub fn start(now_ms: u64, timeout_ms: u64) -> Self {
        Self {
            start_ms: now_ms,
            timeout_ms,
        }
    }

    /// Time spent waiting so far.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_ms)
    }

    /// `true` once strictly more than the timeout has elapsed.
    pub fn expired(&self, now_ms: u64) -> bool {
        self.elapsed_ms(now_ms) > self.timeout_ms
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Block until `cond` is true, checking it at most `max_attempts` times with `delay_ms` between
/// attempts.
///
/// `abort` is checked before every attempt, and the wait gives up as soon as it returns `true`.
pub fn poll_until<A, C>(
    clock: &dyn Clock,
    max_attempts: u32,
    delay_ms: u64,
    mut abort: A,
    mut cond: C,
) -> WaitOutcome
where
    A: FnMut() -> bool,
    C: FnMut() -> bool,
{
    for attempt in 0..max_attempts {
        if abort() {
            return WaitOutcome::Aborted;
        }

        if cond() {
            return WaitOutcome::Met;
        }

        if attempt + 1 < max_attempts {
            clock.sleep_ms(delay_ms);
        }
    }

    WaitOutcome::Exhausted
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_ms(), 100);

        clock.advance(50);
        clock.sleep_ms(25);
        assert_eq!(clock.now_ms(), 175);

        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_bounded_wait() {
        let wait = BoundedWait::start(1000, 500);
        assert!(!wait.expired(1000));
        assert!(!wait.expired(1500));
        assert!(wait.expired(1501));
        assert_eq!(wait.elapsed_ms(1200), 200);

        // A clock earlier than the start never counts as elapsed
        assert_eq!(wait.elapsed_ms(900), 0);
    }

    #[test]
    fn test_poll_until_met() {
        let clock = ManualClock::new(0);
        let mut checks = 0;

        let outcome = poll_until(&clock, 10, 100, || false, || {
            checks += 1;
            checks == 3
        });

        assert_eq!(outcome, WaitOutcome::Met);
        assert_eq!(clock.now_ms(), 200);
    }

    #[test]
    fn test_poll_until_exhausted() {
        let clock = ManualClock::new(0);

        let outcome = poll_until(&clock, 4, 250, || false, || false);

        assert_eq!(outcome, WaitOutcome::Exhausted);

        // No sleep after the last attempt
        assert_eq!(clock.now_ms(), 750);
    }

    #[test]
    fn test_poll_until_aborted() {
        let clock = ManualClock::new(0);

        let outcome = poll_until(&clock, 10, 100, || clock.now_ms() >= 300, || false);

        assert_eq!(outcome, WaitOutcome::Aborted);
        assert_eq!(clock.now_ms(), 300);
    }
}
