//! Reconnect backoff schedule.

use std::time::Duration;

/// Delay before reconnect attempt `k`.
///
/// `k` in `0..=exponential_until` waits `base * 2^k`, later attempts wait a
/// fixed plateau, and past `max_attempts` the session gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base: Duration,
    exponential_until: u32,
    plateau: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, exponential_until: u32, plateau: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            exponential_until,
            plateau,
            max_attempts,
        }
    }

    /// `None` once the attempt budget is exhausted.
    pub fn delay_for_attempt(&self, k: u32) -> Option<Duration> {
        if k > self.max_attempts {
            None
        } else if k > self.exponential_until {
            Some(self.plateau)
        } else {
            Some(self.base.saturating_mul(1_u32 << k.min(31)))
        }
    }
}

impl Default for ReconnectPolicy {
    /// 1s doubling up to 1024s (attempt 10), then ~34 minutes per attempt up
    /// to attempt 100.
    fn default() -> Self {
        Self::new(
            Duration::from_millis(1000),
            10,
            Duration::from_millis(2_048_000),
            100,
        )
    }
}
