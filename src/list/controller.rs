//! Paginated list controller.
//!
//! Owns [`PaginationState`] and drives fetch cycles through a [`Revalidator`].
//! Each cycle runs as a spawned task tagged with a generation number and bound
//! to its own cancel controller. Starting a cycle cancels the previous one, and
//! outcomes from any generation but the current one are discarded, so a slow
//! response can never overwrite fresher state.
//!
//! Outcomes are applied on the caller's task, through [`ListController::poll`]
//! (non-blocking, for an event loop tick) or [`ListController::next_update`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::merge::{merge_page, Keyed};
use super::state::{ListView, PaginationState, Phase};
use crate::cache::{DurableStore, Fetched};
use crate::fetch::{CancelController, CancelReason, FetchError, Transport};
use crate::revalidate::Revalidator;

/// Where pages come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListConfig {
  /// Collection path, e.g. `pokemon`
  pub endpoint: String,
  /// Cache keys are `{key_prefix}-{offset}`
  pub key_prefix: String,
  pub page_size: usize,
}

impl Default for ListConfig {
  fn default() -> Self {
    Self {
      endpoint: "pokemon".to_string(),
      key_prefix: "list".to_string(),
      page_size: 20,
    }
  }
}

impl ListConfig {
  pub fn cache_key(&self, offset: usize) -> String {
    format!("{}-{}", self.key_prefix, offset)
  }

  pub fn page_endpoint(&self, offset: usize) -> String {
    format!(
      "{}?limit={}&offset={}",
      self.endpoint, self.page_size, offset
    )
  }
}

/// Pull the `results` array out of a page response; that array is what gets cached.
pub fn page_results(mut body: Value) -> Result<Value, FetchError> {
  match body.get_mut("results").map(Value::take) {
    Some(results @ Value::Array(_)) => Ok(results),
    _ => Err(FetchError::Decode("response has no results array".to_string())),
  }
}

fn decode_items<T: DeserializeOwned>(fetched: Fetched<Value>) -> Result<Fetched<Vec<T>>, FetchError> {
  let source = fetched.source;
  serde_json::from_value(fetched.data)
    .map(|items| Fetched { data: items, source })
    .map_err(|e| FetchError::Decode(e.to_string()))
}

struct CycleOutcome<T> {
  generation: u64,
  offset: usize,
  result: Result<Fetched<Vec<T>>, FetchError>,
}

pub struct ListController<T, S: DurableStore, Tr: Transport> {
  loader: Revalidator<S, Tr>,
  config: ListConfig,
  state: PaginationState<T>,
  generation: u64,
  current: Option<CancelController>,
  offline: Option<bool>,
  tx: mpsc::UnboundedSender<CycleOutcome<T>>,
  rx: mpsc::UnboundedReceiver<CycleOutcome<T>>,
}

impl<T, S, Tr> ListController<T, S, Tr>
where
  T: Keyed + DeserializeOwned + Send + 'static,
  S: DurableStore,
  Tr: Transport,
{
  pub fn new(loader: Revalidator<S, Tr>, config: ListConfig) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      loader,
      config,
      state: PaginationState::default(),
      generation: 0,
      current: None,
      offline: None,
      tx,
      rx,
    }
  }

  pub fn state(&self) -> &PaginationState<T> {
    &self.state
  }

  pub fn view(&self) -> ListView<'_, T> {
    self.state.view()
  }

  pub fn phase(&self) -> Phase {
    self.state.phase()
  }

  pub fn config(&self) -> &ListConfig {
    &self.config
  }

  pub fn loader(&self) -> &Revalidator<S, Tr> {
    &self.loader
  }

  /// Last reported connectivity; `false` until something is reported.
  pub fn is_offline(&self) -> bool {
    self.offline.unwrap_or(false)
  }

  /// Start the first cycle at the current offset.
  pub fn start(&mut self) {
    self.begin_cycle(false);
  }

  /// Jump to `offset` and load it, superseding any in-flight cycle.
  pub fn set_offset(&mut self, offset: usize) {
    self.state.offset = offset;
    self.begin_cycle(false);
  }

  /// React to a connectivity report; a change reloads the current offset.
  pub fn connectivity_changed(&mut self, online: bool) {
    let offline = !online;
    if self.offline == Some(offline) {
      return;
    }
    self.offline = Some(offline);
    info!(offline, "connectivity changed");

    if self.state.phase() != Phase::Idle {
      self.begin_cycle(false);
    }
  }

  /// Load the next page once the end of the list is reached.
  ///
  /// Suppressed (returns `false`) unless the list is settled in [`Phase::Loaded`],
  /// so repeated end-of-list triggers cannot stack up requests.
  pub fn advance(&mut self) -> bool {
    if self.state.phase() != Phase::Loaded {
      debug!(phase = ?self.state.phase(), "pagination suppressed");
      return false;
    }
    self.state.offset += self.config.page_size;
    self.begin_cycle(false);
    true
  }

  /// Step back one page, clamping at zero.
  pub fn previous(&mut self) {
    let offset = self.state.offset.saturating_sub(self.config.page_size);
    self.set_offset(offset);
  }

  /// Retry after a failure.
  ///
  /// With nothing loaded, start over from offset 0; otherwise re-fetch the
  /// current offset straight from the network.
  pub fn retry(&mut self) {
    if self.state.items.is_empty() {
      self.state.offset = 0;
      self.begin_cycle(false);
    } else {
      self.begin_cycle(true);
    }
  }

  /// Reload from the first page, bypassing the cache.
  pub fn refresh(&mut self) {
    self.state.offset = 0;
    self.begin_cycle(true);
  }

  fn begin_cycle(&mut self, force: bool) {
    if let Some(previous) = self.current.take() {
      if previous.cancel(CancelReason::Superseded) {
        debug!(generation = self.generation, "superseded in-flight cycle");
      }
    }

    self.generation += 1;
    let generation = self.generation;
    let offset = self.state.offset;
    let controller = CancelController::new();
    self.current = Some(controller.clone());
    self.state.begin();
    self.state.error = None;

    let key = self.config.cache_key(offset);
    let endpoint = self.config.page_endpoint(offset);
    let loader = self.loader.clone();
    let tx = self.tx.clone();
    let signal = controller.signal();

    debug!(generation, offset, force, "starting fetch cycle");
    tokio::spawn(async move {
      let result = loader
        .load(&key, &endpoint, page_results, force, &signal)
        .await
        .and_then(decode_items::<T>);
      // Ignore send errors - the controller may be gone
      let _ = tx.send(CycleOutcome {
        generation,
        offset,
        result,
      });
    });
  }

  /// Apply finished cycles without waiting. Returns `true` if state changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(outcome) = self.rx.try_recv() {
      changed |= self.apply(outcome);
    }
    changed
  }

  /// Wait for the current cycle to finish and apply it.
  ///
  /// Returns `false` immediately if nothing is loading.
  pub async fn next_update(&mut self) -> bool {
    while self.state.loading {
      match self.rx.recv().await {
        Some(outcome) => {
          if self.apply(outcome) {
            return true;
          }
        }
        None => break,
      }
    }
    false
  }

  fn apply(&mut self, outcome: CycleOutcome<T>) -> bool {
    if outcome.generation != self.generation {
      debug!(
        generation = outcome.generation,
        current = self.generation,
        "discarding superseded outcome"
      );
      return false;
    }

    match outcome.result {
      Err(e) if e.is_cancelled() => {
        debug!(generation = outcome.generation, "current cycle cancelled");
        return false;
      }
      Ok(fetched) => {
        let count = fetched.data.len();
        merge_page(&mut self.state.items, fetched.data, outcome.offset == 0);
        self.state.last_source = Some(fetched.source);
        self.state.error = None;
        info!(
          offset = outcome.offset,
          count,
          total = self.state.items.len(),
          source = ?fetched.source,
          "page loaded"
        );
      }
      Err(e) => {
        warn!(offset = outcome.offset, error = %e, "page load failed");
        self.state.error = Some(e.into());
      }
    }

    self.state.loading = false;
    self.current = None;
    true
  }

  /// Cancel the in-flight cycle and all background refreshes.
  pub fn shutdown(&mut self) {
    if let Some(current) = self.current.take() {
      current.cancel(CancelReason::Shutdown);
    }
    self.state.loading = false;
    self.loader.shutdown();
  }
}

impl<T, S: DurableStore, Tr: Transport> Drop for ListController<T, S, Tr> {
  fn drop(&mut self) {
    if let Some(current) = self.current.take() {
      current.cancel(CancelReason::Shutdown);
    }
  }
}
