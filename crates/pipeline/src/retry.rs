use std::time::Duration;

use crate::config::RetryConfig;

/// Backoff schedule for transient failures: exponential with
/// deterministic jitter.
///
/// Jitter is spread by cycling the attempt number through the
/// configured fraction (±20% by default), so concurrent retries fan out
/// without a random number generator.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    multiplier: f64,
    jitter: f64,
    max_attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
            max_attempts: config.max_attempts,
        }
    }

    /// Attempts allowed per transient failure, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The backoff before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // In practice `attempt` is a small retry count, so wrapping
        // cannot occur.
        #[allow(clippy::cast_possible_wrap)]
        let raw = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32);

        // Cycle through -1, -1/2, 0, 1/2, 1 of the jitter fraction.
        let step = f64::from(attempt % 5).mul_add(0.5, -1.0);
        let factor = self.jitter.mul_add(step, 1.0);
        Duration::from_secs_f64(raw * factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}
