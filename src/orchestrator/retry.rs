//! Retry policy: exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff starting at 1s, factor 2, +-20% jitter, capped at
/// 60s per step, max 5 attempts by default.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub jitter_ratio: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            jitter_ratio: 0.2,
            cap: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Computes the backoff delay before the attempt *after* `completed_attempt`.
    #[must_use]
    pub fn backoff_for(&self, completed_attempt: u32) -> Duration {
        let exponent = completed_attempt.saturating_sub(1);
        let raw_secs = self.base.as_secs_f64() * self.factor.powi(exponent as i32);
        let capped_secs = raw_secs.min(self.cap.as_secs_f64());
        let jitter = 1.0 + rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio);
        Duration::from_secs_f64((capped_secs * jitter).max(0.0))
    }

    /// Whether an HTTP status is considered a transient, retryable failure:
    /// network error, 5xx, or 429; any other 4xx is permanent.
    #[must_use]
    pub fn is_transient_status(status: u16) -> bool {
        status >= 500 || status == 429 || status == 408
    }
}
