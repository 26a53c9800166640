//! Retry policy for provider requests.
//!
//! Exponential backoff with a cap and a small random jitter.

use super::ProviderError;
use rand::Rng;
use std::time::Duration;

/// Fraction of the computed backoff that may be added as jitter.
const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// `initial_backoff * multiplier^retry_count`, capped at `max_backoff`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Backoff plus up to 20% random jitter, so concurrent callers spread out.
    pub fn backoff_with_jitter(&self, retry_count: u32) -> Duration {
        let base = self.backoff(retry_count);
        let jitter_max = base.as_millis() as f64 * JITTER_FRACTION;
        if jitter_max < 1.0 {
            return base;
        }
        let jitter = rand::rng().random_range(0.0..jitter_max);
        base + Duration::from_millis(jitter as u64)
    }

    pub fn should_retry(&self, error: &ProviderError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}
