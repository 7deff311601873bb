use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy applied to the attempts of a single task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of extra attempts after the first one
    pub retries: u32,
    /// Delay slept between a failed attempt and the next one
    pub retry_delay: Duration,
    /// Multiplier applied per retry (1.0 keeps the delay constant)
    pub backoff_multiplier: f64,
    /// Cap for exponential backoff; never lowers the delay below `retry_delay`
    pub max_delay: Duration,
    /// Jitter factor to prevent thundering herd (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay: Duration::from_secs(1),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
            ..Default::default()
        }
    }

    /// Total attempts a task may make, first run included
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `attempt` (zero-based) failed
    pub fn has_remaining(&self, attempt: u32) -> bool {
        attempt < self.retries
    }

    /// Delay before the attempt following `attempt` (zero-based).
    ///
    /// `max_delay` only bounds backoff growth; the first retry always waits the full
    /// `retry_delay`, even when that is above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.retry_delay.as_millis() as f64;
        let exponential_ms = base_ms * self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let max_ms = self.max_delay.max(self.retry_delay).as_millis() as f64;
        let capped_ms = exponential_ms.min(max_ms);

        let jitter_range = capped_ms * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        let final_ms = (capped_ms + jitter).clamp(0.0, max_ms);
        Duration::from_millis(final_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_delay_by_default() {
        let policy = RetryPolicy::new(3, Duration::from_millis(250));

        for attempt in 0..3 {
            assert_eq!(policy.delay_for(attempt), Duration::from_millis(250));
        }
        assert_eq!(policy.max_attempts(), 4);
        assert!(policy.has_remaining(2));
        assert!(!policy.has_remaining(3));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            retries: 10,
            retry_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
        };

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(8), Duration::from_secs(10));
    }

    #[test]
    fn test_long_retry_delay_is_not_cut_to_max_delay() {
        let policy = RetryPolicy::new(2, Duration::from_secs(120));
        assert!(policy.max_delay < policy.retry_delay);

        assert_eq!(policy.delay_for(0), Duration::from_secs(120));
        assert_eq!(policy.delay_for(1), Duration::from_secs(120));

        let growing = RetryPolicy {
            backoff_multiplier: 2.0,
            ..policy
        };
        assert_eq!(growing.delay_for(3), Duration::from_secs(120));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            retries: 5,
            retry_delay: Duration::from_millis(1000),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
        };

        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1100));
        }
    }
}
