// src/io/serial/backoff.rs
//
// Reconnect delay schedule. A pure function of the attempt number so the
// schedule can be checked without waiting on timers.

use std::time::Duration;

/// Exponential backoff: `base`, `2 * base`, `4 * base`, ... held at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        // A ceiling below the base would make the schedule shrink
        BackoffPolicy {
            base,
            max: max.max(base),
        }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 is treated as 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base
            .checked_mul(factor)
            .map(|d| d.min(self.max))
            .unwrap_or(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_doubles_then_holds() {
        let policy = BackoffPolicy::from_millis(100, 1000);
        let delays: Vec<u64> = (1..=7).map(|a| policy.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000, 1000]);
    }

    #[test]
    fn test_schedule_is_monotonic_and_bounded() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous);
            assert!(delay <= policy.max);
            previous = delay;
        }
    }

    #[test]
    fn test_attempt_zero_is_base() {
        let policy = BackoffPolicy::from_millis(250, 5000);
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
    }

    #[test]
    fn test_ceiling_below_base_is_raised() {
        let policy = BackoffPolicy::from_millis(500, 100);
        assert_eq!(policy.max, Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }
}
