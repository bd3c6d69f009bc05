//! Exponential backoff with jitter for transient transport failures.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub factor: f64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay: Duration::from_secs(1),
      factor: 2.0,
    }
  }
}

/// Delay before attempt `attempt` (0-indexed retry count, i.e. 0 is the first retry),
/// with +/-20% jitter to avoid thundering-herd retries.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
  let exp = config.factor.powi(attempt as i32);
  let nominal = config.base_delay.as_secs_f64() * exp;
  let jitter = rand::thread_rng().gen_range(0.8..1.2);
  Duration::from_secs_f64(nominal * jitter)
}

/// Whether an HTTP status code should be retried (429 or any 5xx).
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
  status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
