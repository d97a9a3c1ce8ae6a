//! Fetch error taxonomy and attempt classification.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::cancel::CancelReason;
use super::transport::{HttpResponse, TransportError};

/// Errors produced by the resilient fetch client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
  /// A single attempt exceeded its deadline
  #[error("request timed out after {}ms", .0.as_millis())]
  Timeout(Duration),

  /// Upstream returned a 5xx status
  #[error("server error: HTTP {0}")]
  Server(u16),

  /// Upstream returned a 4xx status; the request itself is wrong
  #[error("client error: HTTP {0}")]
  Client(u16),

  /// Low-level network failure (offline, DNS, refused connection)
  #[error("connection failed: {0}")]
  Connection(String),

  /// The operation was superseded or torn down
  #[error("request cancelled: {0}")]
  Cancelled(CancelReason),

  /// Every attempt failed with a retryable error
  #[error("gave up after {attempts} attempts: {last}")]
  RetriesExhausted { attempts: u32, last: Box<FetchError> },

  /// A successful response whose body is not the JSON we expected
  #[error("invalid response body: {0}")]
  Decode(String),

  /// The endpoint could not be resolved against the base URL
  #[error("invalid endpoint: {0}")]
  InvalidUrl(String),
}

impl FetchError {
  /// Whether another attempt could succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      FetchError::Timeout(_) | FetchError::Server(_) | FetchError::Connection(_)
    )
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, FetchError::Cancelled(_))
  }

  /// Cancellation is never shown to the user.
  pub fn is_user_visible(&self) -> bool {
    !self.is_cancelled()
  }

  /// HTTP status carried by this error, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      FetchError::Server(status) | FetchError::Client(status) => Some(*status),
      FetchError::RetriesExhausted { last, .. } => last.status(),
      _ => None,
    }
  }

  /// Whether the failure means "this resource does not exist".
  pub fn is_not_found(&self) -> bool {
    matches!(self, FetchError::Client(404))
  }
}

/// What one attempt produced, before any interpretation.
#[derive(Debug)]
pub enum AttemptOutcome {
  /// The server answered
  Response(HttpResponse),
  /// The per-attempt deadline elapsed first
  TimedOut(Duration),
  /// The transport failed or was aborted
  Transport(TransportError),
}

/// Map a raw attempt outcome onto the taxonomy.
///
/// 4xx and 5xx statuses become errors; any other status is treated as resolved and
/// its body parsed as JSON.
pub fn classify(outcome: AttemptOutcome) -> Result<Value, FetchError> {
  match outcome {
    AttemptOutcome::Response(response) => match response.status {
      400..=499 => Err(FetchError::Client(response.status)),
      500..=599 => Err(FetchError::Server(response.status)),
      _ => serde_json::from_slice(&response.body).map_err(|e| FetchError::Decode(e.to_string())),
    },
    AttemptOutcome::TimedOut(after) => Err(FetchError::Timeout(after)),
    AttemptOutcome::Transport(TransportError::Network(message)) => {
      Err(FetchError::Connection(message))
    }
    AttemptOutcome::Transport(TransportError::Aborted(reason)) => Err(FetchError::Cancelled(reason)),
  }
}
