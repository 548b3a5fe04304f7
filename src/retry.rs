//! Retry backoff strategies (§4.7).

use std::time::Duration;

use serde::Serialize;

/// Strategy for calculating the delay before a retried attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RetryStrategy {
    /// No delay.
    Immediate,
    /// A constant delay on every retry.
    Fixed,
    /// `base_delay * 2^(attempts - 1)`, optionally capped.
    Exponential { max_delay: Option<Duration> },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Fixed
    }
}

impl RetryStrategy {
    pub fn exponential() -> Self {
        Self::Exponential { max_delay: None }
    }

    pub fn exponential_capped(max_delay: Duration) -> Self {
        Self::Exponential {
            max_delay: Some(max_delay),
        }
    }

    /// Delay before attempt number `attempts` (1-indexed: the value just
    /// recorded on `Task::attempts` after the failed attempt), given the
    /// configured `base_delay`.
    pub fn delay_for_attempt(&self, attempts: u32, base_delay: Duration) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed => base_delay,
            Self::Exponential { max_delay } => {
                let exponent = attempts.saturating_sub(1).min(31);
                let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
                let delay = base_delay.saturating_mul(multiplier as u32);
                match max_delay {
                    Some(cap) if delay > *cap => *cap,
                    _ => delay,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_has_no_delay() {
        assert_eq!(
            RetryStrategy::Immediate.delay_for_attempt(5, Duration::from_millis(100)),
            Duration::ZERO
        );
    }

    #[test]
    fn fixed_delay_is_constant_across_attempts() {
        let strategy = RetryStrategy::Fixed;
        let base = Duration::from_millis(100);
        assert_eq!(strategy.delay_for_attempt(1, base), base);
        assert_eq!(strategy.delay_for_attempt(4, base), base);
    }

    #[test]
    fn exponential_delays_strictly_increase() {
        let strategy = RetryStrategy::exponential();
        let base = Duration::from_millis(100);
        let d1 = strategy.delay_for_attempt(1, base);
        let d2 = strategy.delay_for_attempt(2, base);
        let d3 = strategy.delay_for_attempt(3, base);
        assert!(d2 > d1);
        assert!(d3 > d2);
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(400));
    }

    #[test]
    fn exponential_respects_cap() {
        let strategy = RetryStrategy::exponential_capped(Duration::from_millis(250));
        let base = Duration::from_millis(100);
        assert_eq!(strategy.delay_for_attempt(3, base), Duration::from_millis(250));
    }
}
