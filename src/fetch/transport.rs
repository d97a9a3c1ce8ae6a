//! The network seam: one HTTP GET bound to a cancellation signal.

use reqwest::Client;
use std::future::Future;
use thiserror::Error;

use super::cancel::{CancelReason, CancelSignal};

/// A fully-read HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

/// Low-level transport failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
  /// The request never produced a response
  #[error("network request failed: {0}")]
  Network(String),

  /// The bound signal fired before the response was read
  #[error("request aborted: {0}")]
  Aborted(CancelReason),
}

/// Performs a single GET request.
///
/// Implementations must stop work and return [`TransportError::Aborted`] once
/// `signal` fires.
pub trait Transport: Send + Sync + 'static {
  fn get(
    &self,
    url: &str,
    signal: &CancelSignal,
  ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

/// reqwest-backed transport. Dropping the in-flight future aborts the request.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
  client: Client,
}

impl ReqwestTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Use a preconfigured HTTP client
  pub fn with_client(client: Client) -> Self {
    Self { client }
  }

  async fn send(&self, url: &str) -> Result<HttpResponse, TransportError> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| TransportError::Network(e.to_string()))?;

    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(|e| TransportError::Network(e.to_string()))?;

    Ok(HttpResponse {
      status,
      body: body.to_vec(),
    })
  }
}

impl Transport for ReqwestTransport {
  async fn get(&self, url: &str, signal: &CancelSignal) -> Result<HttpResponse, TransportError> {
    tokio::select! {
      biased;
      reason = signal.cancelled() => Err(TransportError::Aborted(reason)),
      result = self.send(url) => result,
    }
  }
}
