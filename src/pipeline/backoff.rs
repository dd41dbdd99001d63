//! Exponential backoff between flush attempts.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

const JITTER: f64 = 0.1;

/// Delay schedule for one batch: `initial * multiplier^n`, capped, with ±10% jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    max_attempts: u32,
    failures: u32,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
            failures: 0,
        }
    }

    /// Failed attempts recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure. Returns the delay before the next attempt, or
    /// `None` once the attempt budget is spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.max_attempts > 0 && self.failures >= self.max_attempts {
            return None;
        }
        let base = self.base_delay(self.failures - 1);
        let factor = rand::rng().random_range(1.0 - JITTER..=1.0 + JITTER);
        Some(base.mul_f64(factor).min(self.max))
    }

    /// Delay before jitter after `n` previous failures.
    fn base_delay(&self, n: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(n.min(64) as i32);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            max_attempts,
        }
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let backoff = Backoff::new(&retry(0));
        assert_eq!(backoff.base_delay(0), Duration::from_millis(500));
        assert_eq!(backoff.base_delay(1), Duration::from_secs(1));
        assert_eq!(backoff.base_delay(3), Duration::from_secs(4));
        assert_eq!(backoff.base_delay(10), Duration::from_secs(30));
        assert_eq!(backoff.base_delay(1000), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_bounds() {
        let mut backoff = Backoff::new(&retry(0));
        for n in 0..20 {
            let delay = backoff.on_failure().unwrap();
            let base = backoff.base_delay(n);
            assert!(delay >= base.mul_f64(0.9) && delay <= base.mul_f64(1.1).min(Duration::from_secs(30)));
        }
        assert_eq!(backoff.failures(), 20);
    }

    #[test]
    fn test_attempt_budget() {
        let mut backoff = Backoff::new(&retry(3));
        assert!(backoff.on_failure().is_some());
        assert!(backoff.on_failure().is_some());
        assert!(backoff.on_failure().is_none());
    }
}
