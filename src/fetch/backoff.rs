//! Retry policy: exponential backoff with uniform jitter.

use rand::Rng;
use std::time::Duration;

use super::error::FetchError;

/// Exponential backoff: `base * 2^attempt` plus jitter drawn from `[0, max_jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
  pub base: Duration,
  pub max_jitter: Duration,
}

impl Backoff {
  /// Delay before the retry that follows failed attempt `attempt` (0-based).
  pub fn delay(&self, attempt: u32) -> Duration {
    self.delay_with(attempt, &mut rand::thread_rng())
  }

  pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
    let base = self
      .base
      .saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let jitter_ms = self.max_jitter.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
      0
    } else {
      rng.gen_range(0..jitter_ms)
    };
    base.saturating_add(Duration::from_millis(jitter))
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Self {
      base: Duration::from_millis(1000),
      max_jitter: Duration::from_millis(500),
    }
  }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
  /// Sleep for the given delay, then try again
  Retry(Duration),
  /// Stop and report this error
  Fail(FetchError),
}

/// Attempt budget, per-attempt deadline and backoff for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, including the first
  pub max_retries: u32,
  pub attempt_timeout: Duration,
  pub backoff: Backoff,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      attempt_timeout: Duration::from_millis(8000),
      backoff: Backoff::default(),
    }
  }
}

impl RetryPolicy {
  /// Decide whether failed attempt `attempt` (0-based) is retried.
  ///
  /// Non-retryable kinds fail as-is. When the budget runs out, a connection
  /// failure is surfaced as the offline error it is; timeouts and server errors
  /// become [`FetchError::RetriesExhausted`].
  pub fn decide(&self, error: FetchError, attempt: u32) -> RetryDecision {
    if !error.is_retryable() {
      return RetryDecision::Fail(error);
    }

    if attempt + 1 < self.max_retries {
      return RetryDecision::Retry(self.backoff.delay(attempt));
    }

    match error {
      FetchError::Connection(_) => RetryDecision::Fail(error),
      last => RetryDecision::Fail(FetchError::RetriesExhausted {
        attempts: self.max_retries,
        last: Box::new(last),
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::cancel::CancelReason;

  #[test]
  fn test_delay_bounds_per_attempt() {
    let backoff = Backoff::default();
    for attempt in 0..3u32 {
      let floor = Duration::from_millis(1000 * 2u64.pow(attempt));
      for _ in 0..200 {
        let delay = backoff.delay(attempt);
        assert!(delay >= floor, "attempt {attempt}: {delay:?} below {floor:?}");
        assert!(
          delay < floor + Duration::from_millis(500),
          "attempt {attempt}: {delay:?} above jitter window"
        );
      }
    }
  }

  #[test]
  fn test_zero_jitter_is_exact() {
    let backoff = Backoff {
      base: Duration::from_millis(10),
      max_jitter: Duration::ZERO,
    };
    assert_eq!(backoff.delay(0), Duration::from_millis(10));
    assert_eq!(backoff.delay(3), Duration::from_millis(80));
  }

  #[test]
  fn test_client_errors_fail_immediately() {
    let policy = RetryPolicy::default();
    assert_eq!(
      policy.decide(FetchError::Client(404), 0),
      RetryDecision::Fail(FetchError::Client(404))
    );
  }

  #[test]
  fn test_cancellation_is_never_retried() {
    let policy = RetryPolicy::default();
    let cancelled = FetchError::Cancelled(CancelReason::Superseded);
    assert_eq!(
      policy.decide(cancelled.clone(), 0),
      RetryDecision::Fail(cancelled)
    );
  }

  #[test]
  fn test_retryable_until_budget_is_spent() {
    let policy = RetryPolicy::default();
    assert!(matches!(
      policy.decide(FetchError::Server(503), 0),
      RetryDecision::Retry(_)
    ));
    assert!(matches!(
      policy.decide(FetchError::Server(503), 1),
      RetryDecision::Retry(_)
    ));
    assert_eq!(
      policy.decide(FetchError::Server(503), 2),
      RetryDecision::Fail(FetchError::RetriesExhausted {
        attempts: 3,
        last: Box::new(FetchError::Server(503)),
      })
    );
  }

  #[test]
  fn test_last_connection_failure_stays_connection() {
    let policy = RetryPolicy::default();
    assert_eq!(
      policy.decide(FetchError::Connection("offline".into()), 2),
      RetryDecision::Fail(FetchError::Connection("offline".into()))
    );
  }
}
