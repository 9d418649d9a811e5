use std::time::Duration;

use rand::Rng;

use crate::config::DeliveryConfig;

/// Exponential backoff for failed sends. Attempt `n` (1-based) waits
/// `base * 2^(n-1)`, capped at `max_delay`, plus up to `jitter_ratio` extra.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for RetryPolicy {
    fn from(value: &DeliveryConfig) -> Self {
        Self {
            max_attempts: value.max_attempts,
            base_delay: Duration::from_millis(value.base_delay_ms),
            max_delay: Duration::from_millis(value.max_delay_ms),
            jitter_ratio: value.jitter_ratio,
        }
    }
}

impl RetryPolicy {
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = 1_u32 << exponent;
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    pub fn backoff_with_jitter<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.backoff(attempt);
        let spread_ms = (delay.as_millis() as f64 * self.jitter_ratio.clamp(0.0, 1.0)) as u64;
        if spread_ms == 0 {
            return delay;
        }
        (delay + Duration::from_millis(rng.gen_range(0..=spread_ms))).min(self.max_delay)
    }
}
