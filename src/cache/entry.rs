//! Cache entry encoding and result metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached value with its absolute expiry.
///
/// Serialized into the durable tier as `{"data": <json>, "expires": <epoch ms>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub data: Value,
  /// Expiry as milliseconds since the Unix epoch
  #[serde(rename = "expires")]
  pub expires_at_ms: i64,
}

impl CacheEntry {
  pub fn new(data: Value, written_at_ms: i64, ttl_ms: i64) -> Self {
    Self {
      data,
      expires_at_ms: written_at_ms.saturating_add(ttl_ms),
    }
  }

  /// An entry is valid strictly before its expiry instant.
  pub fn is_valid_at(&self, now_ms: i64) -> bool {
    now_ms < self.expires_at_ms
  }
}

/// Where a loaded value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the network
  Network,
  /// Valid data from the cache; a background refresh may be in flight
  Cache,
}

/// A loaded value together with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
  pub data: T,
  pub source: CacheSource,
}

impl<T> Fetched<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
    Fetched {
      data: f(self.data),
      source: self.source,
    }
  }
}
