//! Clock Abstraction for Deterministic Simulation Testing
//!
//! Sample freshness and eviction are measured in whole epoch seconds. All
//! "what time is it" questions go through [`Clock`] so the store can be driven
//! by virtual time in tests and by the wall clock in production.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock trait for time operations
///
/// Implementations:
/// - `SystemClock`: Uses real system time
/// - `SimulatedClock`: Uses controlled virtual time for DST
pub trait Clock: Send + Sync + Clone + 'static {
    /// Current time in seconds since the Unix epoch
    fn now_secs(&self) -> i64;
}

/// Production clock using real system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        // A clock set before 1970 reads as negative seconds rather than failing.
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        }
    }
}

/// Simulated clock for deterministic testing
///
/// Time only advances when explicitly told to via `advance_secs()` or `set()`.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    /// Current virtual time in seconds
    time_secs: Arc<AtomicI64>,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimulatedClock {
    /// Create a new simulated clock starting at the given time
    pub fn new(start_secs: i64) -> Self {
        SimulatedClock {
            time_secs: Arc::new(AtomicI64::new(start_secs)),
        }
    }

    /// Advance time by the given number of seconds
    pub fn advance_secs(&self, secs: i64) {
        self.time_secs.fetch_add(secs, Ordering::SeqCst);
    }

    /// Set time to a specific value
    pub fn set(&self, time_secs: i64) {
        self.time_secs.store(time_secs, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now_secs(&self) -> i64 {
        self.time_secs.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_after_2020() {
        let now = SystemClock.now_secs();
        assert!(now > 1_577_836_800, "timestamp should be after 2020");
    }

    #[test]
    fn test_simulated_clock_deterministic() {
        let clock = SimulatedClock::new(1000);

        // Time doesn't advance on its own
        assert_eq!(clock.now_secs(), clock.now_secs());

        clock.advance_secs(10);
        assert_eq!(clock.now_secs(), 1010);

        clock.set(5000);
        assert_eq!(clock.now_secs(), 5000);
    }

    #[test]
    fn test_simulated_clock_shared() {
        let clock = SimulatedClock::new(0);
        let clock2 = clock.clone();

        clock.advance_secs(100);
        assert_eq!(clock2.now_secs(), 100, "Clones should share state");
    }
}
