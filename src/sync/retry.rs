//! Bounded retry for gateway calls.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::gateway::GatewayError;

/// How many times a mutation may be attempted and how long to wait in between.
///
/// Only errors whose code is retryable are repeated; after the last attempt
/// the final error is surfaced unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  max_attempts: u32,
  backoff: Duration,
  exponential: bool,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::none()
  }
}

impl RetryPolicy {
  /// A single attempt.
  pub const fn none() -> Self {
    Self {
      max_attempts: 1,
      backoff: Duration::ZERO,
      exponential: false,
    }
  }

  /// One initial attempt plus up to `retries` more.
  pub const fn retries(retries: u32) -> Self {
    Self {
      max_attempts: retries.saturating_add(1),
      backoff: Duration::ZERO,
      exponential: false,
    }
  }

  pub const fn with_backoff(mut self, backoff: Duration) -> Self {
    self.backoff = backoff;
    self
  }

  /// Double the backoff after every failed attempt.
  pub const fn exponential(mut self) -> Self {
    self.exponential = true;
    self
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  /// Delay before attempt number `attempt + 1`, where `attempt` is 1-based.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    if self.exponential {
      let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
      self.backoff.saturating_mul(factor)
    } else {
      self.backoff
    }
  }

  /// Run `op` until it succeeds, fails with a non-retryable error, or the
  /// attempts are exhausted.
  pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, GatewayError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
  {
    let mut attempt = 1;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(err) if attempt < self.max_attempts && err.code.is_retryable() => {
          let delay = self.delay_after(attempt);
          warn!(attempt, max_attempts = self.max_attempts, ?delay, "retrying after: {}", err);
          if !delay.is_zero() {
            tokio::time::sleep(delay).await;
          }
          attempt += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }
}

/// Retry settings as they appear in the config file.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
  pub retries: u32,
  pub backoff_ms: u64,
  pub exponential: bool,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      retries: 3,
      backoff_ms: 500,
      exponential: true,
    }
  }
}

impl From<RetryConfig> for RetryPolicy {
  fn from(config: RetryConfig) -> Self {
    let policy = RetryPolicy::retries(config.retries).with_backoff(Duration::from_millis(config.backoff_ms));
    if config.exponential {
      policy.exponential()
    } else {
      policy
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gateway::ErrorCode;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[test]
  fn test_delays() {
    let fixed = RetryPolicy::retries(3).with_backoff(Duration::from_millis(100));
    assert_eq!(fixed.delay_after(1), Duration::from_millis(100));
    assert_eq!(fixed.delay_after(3), Duration::from_millis(100));

    let exp = fixed.exponential();
    assert_eq!(exp.delay_after(1), Duration::from_millis(100));
    assert_eq!(exp.delay_after(2), Duration::from_millis(200));
    assert_eq!(exp.delay_after(3), Duration::from_millis(400));
  }

  #[test]
  fn test_from_config() {
    let policy = RetryPolicy::from(RetryConfig::default());
    assert_eq!(policy.max_attempts(), 4);
    assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retries_until_success() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::retries(3).with_backoff(Duration::from_millis(50));

    let result = policy
      .run(|| async {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
          Err(GatewayError::network("flaky"))
        } else {
          Ok(n)
        }
      })
      .await;

    assert_eq!(result, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_exhaustion_surfaces_last_error() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::retries(2);

    let result: Result<(), _> = policy
      .run(|| async {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Err(GatewayError::network(format!("attempt {}", n)))
      })
      .await;

    assert_eq!(result.unwrap_err().message, "attempt 2");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_non_retryable_errors_fail_fast() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::retries(5);

    let result: Result<(), _> = policy
      .run(|| async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(GatewayError::new(ErrorCode::NotFound, "gone"))
      })
      .await;

    assert!(result.unwrap_err().is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
