//! Cache-first loading with stale-while-revalidate.
//!
//! 1. Unless forced, check the cache; on a hit, return it and refresh the entry
//!    in the background
//! 2. Otherwise fetch from the network, write the result through to the cache,
//!    and return it
//!
//! Background refreshes only ever rewrite the cache. They keep running after the
//! caller has moved on (a page the user scrolled past still gets its entry
//! refreshed), and stop only when the revalidator shuts down.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tracing::debug;

use crate::cache::{DurableStore, Fetched, TtlCache};
use crate::fetch::{CancelController, CancelReason, CancelSignal, FetchError, ResilientClient, Transport};

/// Turns a response body into the value that gets cached.
pub type Extract = fn(Value) -> Result<Value, FetchError>;

/// Cache the whole response body.
pub fn whole_body(body: Value) -> Result<Value, FetchError> {
  Ok(body)
}

/// Cache + network loader shared by list pages and detail lookups.
pub struct Revalidator<S: DurableStore, T: Transport> {
  cache: TtlCache<S>,
  client: ResilientClient<T>,
  shutdown: CancelController,
  background: Arc<Mutex<JoinSet<()>>>,
}

impl<S: DurableStore, T: Transport> Revalidator<S, T> {
  pub fn new(cache: TtlCache<S>, client: ResilientClient<T>) -> Self {
    Self {
      cache,
      client,
      shutdown: CancelController::new(),
      background: Arc::new(Mutex::new(JoinSet::new())),
    }
  }

  pub fn cache(&self) -> &TtlCache<S> {
    &self.cache
  }

  pub fn client(&self) -> &ResilientClient<T> {
    &self.client
  }

  fn background(&self) -> MutexGuard<'_, JoinSet<()>> {
    self
      .background
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Load `endpoint`, cached under `key`.
  ///
  /// With `force`, the cache is not consulted (but still written). A load whose
  /// `cancel` signal fires never writes the cache.
  pub async fn load(
    &self,
    key: &str,
    endpoint: &str,
    extract: Extract,
    force: bool,
    cancel: &CancelSignal,
  ) -> Result<Fetched<Value>, FetchError> {
    if !force {
      if let Some(data) = self.cache.get(key).await {
        if let Some(reason) = cancel.reason() {
          return Err(FetchError::Cancelled(reason));
        }
        self.spawn_revalidation(key, endpoint, extract);
        return Ok(Fetched::from_cache(data));
      }
    }

    let body = self.client.fetch(endpoint, Some(cancel)).await?;
    let data = extract(body)?;

    if let Some(reason) = cancel.reason() {
      debug!(key, %reason, "load cancelled after response, not caching");
      return Err(FetchError::Cancelled(reason));
    }

    self.cache.set(key, data.clone()).await;
    Ok(Fetched::from_network(data))
  }

  /// Refresh `key` from the network without blocking the caller.
  fn spawn_revalidation(&self, key: &str, endpoint: &str, extract: Extract) {
    let cache = self.cache.clone();
    let client = self.client.clone();
    let signal = self.shutdown.signal();
    let key = key.to_string();
    let endpoint = endpoint.to_string();

    let mut background = self.background();
    // Reap refreshes that already finished so the set only tracks live ones
    while background.try_join_next().is_some() {}

    background.spawn(async move {
      match client.fetch(&endpoint, Some(&signal)).await.and_then(extract) {
        Ok(data) if !signal.is_cancelled() => {
          cache.set(&key, data).await;
          debug!(key, "background revalidation refreshed cache");
        }
        Ok(_) => {}
        Err(e) if e.is_cancelled() => debug!(key, "background revalidation cancelled"),
        Err(e) => debug!(key, error = %e, "background revalidation failed"),
      }
    });
  }

  /// Wait for every background refresh started so far.
  pub async fn settle(&self) {
    let mut pending = std::mem::take(&mut *self.background());
    while pending.join_next().await.is_some() {}
  }

  /// Cancel all background refreshes.
  pub fn shutdown(&self) {
    self.shutdown.cancel(CancelReason::Shutdown);
  }
}

impl<S: DurableStore, T: Transport> Clone for Revalidator<S, T> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      client: self.client.clone(),
      shutdown: self.shutdown.clone(),
      background: Arc::clone(&self.background),
    }
  }
}
