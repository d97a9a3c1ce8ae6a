//! HTTP client with per-attempt timeouts, retry with backoff, and cancellation.

use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use super::backoff::{RetryDecision, RetryPolicy};
use super::cancel::{CancelController, CancelReason, CancelSignal};
use super::error::{classify, AttemptOutcome, FetchError};
use super::transport::Transport;

/// Resilient JSON fetcher over a [`Transport`].
///
/// Each call makes up to `max_retries` attempts. Every attempt runs under a signal
/// that fires on external cancellation or on the attempt's own deadline. An
/// external cancellation always wins: the call fails with
/// [`FetchError::Cancelled`] whatever the attempt produced, and is never retried.
pub struct ResilientClient<T: Transport> {
  transport: Arc<T>,
  base_url: Url,
  policy: RetryPolicy,
}

impl<T: Transport> ResilientClient<T> {
  /// Create a client resolving endpoints against `base_url`.
  pub fn new(transport: T, mut base_url: Url) -> Self {
    // Url::join drops the last path segment unless the base ends with a slash.
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    Self {
      transport: Arc::new(transport),
      base_url,
      policy: RetryPolicy::default(),
    }
  }

  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Resolve an endpoint such as `pokemon?limit=20&offset=0` against the base URL.
  pub fn url_for(&self, endpoint: &str) -> Result<Url, FetchError> {
    self
      .base_url
      .join(endpoint.trim_start_matches('/'))
      .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", endpoint, e)))
  }

  /// GET `endpoint` and parse the body as JSON.
  pub async fn fetch(
    &self,
    endpoint: &str,
    cancel: Option<&CancelSignal>,
  ) -> Result<Value, FetchError> {
    let url = self.url_for(endpoint)?;
    let external = cancel.cloned().unwrap_or_else(CancelSignal::never);
    let mut attempt = 0u32;

    loop {
      if let Some(reason) = external.reason() {
        return Err(FetchError::Cancelled(reason));
      }

      let started_at = Instant::now();
      let outcome = self.attempt(url.as_str(), &external).await;

      if let Some(reason) = external.reason() {
        debug!(%url, attempt, %reason, "request cancelled");
        return Err(FetchError::Cancelled(reason));
      }

      let error = match classify(outcome) {
        Ok(body) => {
          debug!(
            %url,
            attempt,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "request succeeded"
          );
          return Ok(body);
        }
        Err(error) => error,
      };

      let failure = error.to_string();
      match self.policy.decide(error, attempt) {
        RetryDecision::Retry(delay) => {
          warn!(
            %url,
            attempt,
            error = %failure,
            delay_ms = delay.as_millis() as u64,
            "request failed, retrying"
          );
          tokio::select! {
            biased;
            reason = external.cancelled() => return Err(FetchError::Cancelled(reason)),
            _ = tokio::time::sleep(delay) => {}
          }
          attempt += 1;
        }
        RetryDecision::Fail(error) => {
          if error.is_user_visible() {
            warn!(%url, attempt, %error, "request failed");
          }
          return Err(error);
        }
      }
    }
  }

  /// Run one attempt under `external` OR a fresh local controller fired by the deadline.
  async fn attempt(&self, url: &str, external: &CancelSignal) -> AttemptOutcome {
    let local = CancelController::new();
    let effective = CancelSignal::any_of([external, &local.signal()]);
    let timeout = self.policy.attempt_timeout;

    tokio::select! {
      result = self.transport.get(url, &effective) => match result {
        Ok(response) => AttemptOutcome::Response(response),
        Err(error) => AttemptOutcome::Transport(error),
      },
      _ = tokio::time::sleep(timeout) => {
        local.cancel(CancelReason::Timeout);
        AttemptOutcome::TimedOut(timeout)
      }
    }
  }
}

impl<T: Transport> Clone for ResilientClient<T> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      base_url: self.base_url.clone(),
      policy: self.policy,
    }
  }
}
