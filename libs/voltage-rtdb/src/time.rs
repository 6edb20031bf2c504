//! Time provider abstraction
//!
//! Separates time acquisition from the code that stamps data, so history
//! ordering can be made deterministic in tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Time provider trait for generating timestamps
///
/// - System time for production use
/// - Fixed/stepping time for testing
pub trait TimeProvider: Send + Sync + 'static {
    /// Get current timestamp in milliseconds since Unix epoch
    fn now_millis(&self) -> i64;
}

/// System time provider using local clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// Fixed time provider for testing
///
/// Returns a predetermined timestamp, useful for deterministic tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedTimeProvider {
    timestamp_ms: i64,
}

impl FixedTimeProvider {
    /// Create a new fixed time provider with the given timestamp
    pub fn new(timestamp_ms: i64) -> Self {
        Self { timestamp_ms }
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now_millis(&self) -> i64 {
        self.timestamp_ms
    }
}

/// Stepping time provider for testing
///
/// Every call returns the previous value plus `step_ms`, so consecutive
/// samples are strictly increasing regardless of wall-clock resolution.
#[derive(Debug)]
pub struct SteppingTimeProvider {
    next_ms: AtomicI64,
    step_ms: i64,
}

impl SteppingTimeProvider {
    /// Start at `start_ms` and advance by `step_ms` per call
    pub fn new(start_ms: i64, step_ms: i64) -> Self {
        Self {
            next_ms: AtomicI64::new(start_ms),
            step_ms,
        }
    }
}

impl TimeProvider for SteppingTimeProvider {
    fn now_millis(&self) -> i64 {
        self.next_ms.fetch_add(self.step_ms, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_provider() {
        let provider = SystemTimeProvider;
        let time1 = provider.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let time2 = provider.now_millis();

        assert!(time2 >= time1);
        assert!(time2 - time1 >= 10);
    }

    #[test]
    fn test_fixed_time_provider() {
        let fixed_time = 1700000000000_i64;
        let provider = FixedTimeProvider::new(fixed_time);

        assert_eq!(provider.now_millis(), fixed_time);
        assert_eq!(provider.now_millis(), fixed_time); // Always returns same value
    }

    #[test]
    fn test_stepping_time_provider() {
        let provider = SteppingTimeProvider::new(1_000, 500);

        assert_eq!(provider.now_millis(), 1_000);
        assert_eq!(provider.now_millis(), 1_500);
        assert_eq!(provider.now_millis(), 2_000);
    }
}
