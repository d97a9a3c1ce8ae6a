//! Cooperative cancellation with composable signals.
//!
//! A [`CancelController`] owns the right to cancel; any number of [`CancelSignal`]s
//! observe it. Signals can be combined with [`CancelSignal::any_of`], which yields a
//! derived signal that fires as soon as any of its sources fires.
//!
//! ```ignore
//! let supersede = CancelController::new();
//! let local = CancelController::new();
//! let effective = CancelSignal::any_of([&supersede.signal(), &local.signal()]);
//!
//! local.cancel(CancelReason::Timeout);
//! assert_eq!(effective.reason(), Some(CancelReason::Timeout));
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use tokio_util::sync::CancellationToken;

/// Why an operation was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
  /// A newer authoritative request replaced this one
  Superseded,
  /// A per-attempt deadline elapsed
  Timeout,
  /// The owner is being torn down
  Shutdown,
  /// Cancelled by a caller for some other reason
  Requested(String),
}

impl fmt::Display for CancelReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CancelReason::Superseded => write!(f, "superseded"),
      CancelReason::Timeout => write!(f, "timed out"),
      CancelReason::Shutdown => write!(f, "shutting down"),
      CancelReason::Requested(why) => write!(f, "{}", why),
    }
  }
}

type Listener = Box<dyn FnOnce(&CancelReason) + Send>;

#[derive(Default)]
struct Listeners {
  next_id: u64,
  pending: Vec<(u64, Listener)>,
}

struct Shared {
  token: CancellationToken,
  reason: OnceLock<CancelReason>,
  listeners: Mutex<Listeners>,
  /// Listeners this signal holds on its `any_of` sources; removed on drop
  sources: Mutex<Vec<Registration>>,
}

impl Shared {
  fn new() -> Self {
    Self {
      token: CancellationToken::new(),
      reason: OnceLock::new(),
      listeners: Mutex::new(Listeners::default()),
      sources: Mutex::new(Vec::new()),
    }
  }

  fn listeners(&self) -> MutexGuard<'_, Listeners> {
    self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Returns false if already cancelled; the first reason sticks.
  fn cancel(&self, reason: CancelReason) -> bool {
    if self.reason.set(reason).is_err() {
      return false;
    }
    self.token.cancel();

    // Listeners run outside the lock so they may cancel other controllers.
    let pending = std::mem::take(&mut self.listeners().pending);
    if let Some(reason) = self.reason.get() {
      for (_, listener) in pending {
        listener(reason);
      }
    }
    true
  }

  /// Queue `listener`, or run it now if already cancelled (returning `None`).
  fn on_cancel(&self, listener: Listener) -> Option<u64> {
    let mut listeners = self.listeners();
    match self.reason.get() {
      Some(reason) => {
        drop(listeners);
        listener(reason);
        None
      }
      None => {
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.pending.push((id, listener));
        Some(id)
      }
    }
  }

  fn remove_listener(&self, id: u64) {
    // The removed listener is dropped after the lock is released.
    let removed = {
      let mut listeners = self.listeners();
      let index = listeners.pending.iter().position(|(pending, _)| *pending == id);
      index.map(|index| listeners.pending.swap_remove(index))
    };
    drop(removed);
  }
}

/// A listener queued on another signal, removed when dropped.
struct Registration {
  source: Weak<Shared>,
  id: u64,
}

impl Drop for Registration {
  fn drop(&mut self) {
    if let Some(source) = self.source.upgrade() {
      source.remove_listener(self.id);
    }
  }
}

/// The cancelling side of a cancellation pair.
#[derive(Clone)]
pub struct CancelController {
  shared: Arc<Shared>,
}

impl CancelController {
  pub fn new() -> Self {
    Self {
      shared: Arc::new(Shared::new()),
    }
  }

  /// Fire the signal. Returns `false` if it had already fired.
  pub fn cancel(&self, reason: CancelReason) -> bool {
    self.shared.cancel(reason)
  }

  pub fn is_cancelled(&self) -> bool {
    self.shared.reason.get().is_some()
  }

  /// A signal observing this controller.
  pub fn signal(&self) -> CancelSignal {
    CancelSignal {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl Default for CancelController {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for CancelController {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CancelController")
      .field("reason", &self.shared.reason.get())
      .finish_non_exhaustive()
  }
}

/// The observing side of a cancellation pair.
#[derive(Clone)]
pub struct CancelSignal {
  shared: Arc<Shared>,
}

impl CancelSignal {
  /// A signal nobody can fire.
  pub fn never() -> Self {
    CancelController::new().signal()
  }

  /// Derive a signal that fires when any of `signals` fires, with that signal's reason.
  ///
  /// Fires immediately if a source has already fired.
  pub fn any_of<'a>(signals: impl IntoIterator<Item = &'a CancelSignal>) -> CancelSignal {
    let derived = CancelController::new();
    let mut registrations = Vec::new();
    for signal in signals {
      let target = Arc::downgrade(&derived.shared);
      let id = signal.shared.on_cancel(Box::new(move |reason: &CancelReason| {
        if let Some(target) = target.upgrade() {
          target.cancel(reason.clone());
        }
      }));
      if let Some(id) = id {
        registrations.push(Registration {
          source: Arc::downgrade(&signal.shared),
          id,
        });
      }
    }
    *derived
      .shared
      .sources
      .lock()
      .unwrap_or_else(PoisonError::into_inner) = registrations;
    derived.signal()
  }

  pub fn is_cancelled(&self) -> bool {
    self.shared.reason.get().is_some()
  }

  pub fn reason(&self) -> Option<CancelReason> {
    self.shared.reason.get().cloned()
  }

  /// Run `listener` once when the signal fires, or right away if it already has.
  pub fn on_cancel(&self, listener: impl FnOnce(&CancelReason) + Send + 'static) {
    self.shared.on_cancel(Box::new(listener));
  }

  /// Listeners still waiting for this signal to fire.
  pub fn pending_listeners(&self) -> usize {
    self.shared.listeners().pending.len()
  }

  /// Wait until the signal fires.
  pub async fn cancelled(&self) -> CancelReason {
    self.shared.token.cancelled().await;
    // The reason is stored before the token fires.
    self
      .shared
      .reason
      .get()
      .cloned()
      .unwrap_or(CancelReason::Shutdown)
  }
}

impl fmt::Debug for CancelSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CancelSignal")
      .field("reason", &self.shared.reason.get())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[test]
  fn test_first_reason_sticks() {
    let controller = CancelController::new();
    assert!(controller.cancel(CancelReason::Superseded));
    assert!(!controller.cancel(CancelReason::Timeout));
    assert_eq!(controller.signal().reason(), Some(CancelReason::Superseded));
  }

  #[test]
  fn test_listener_runs_once() {
    let controller = CancelController::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    controller.signal().on_cancel(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    controller.cancel(CancelReason::Shutdown);
    controller.cancel(CancelReason::Shutdown);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_listener_on_fired_signal_runs_immediately() {
    let controller = CancelController::new();
    controller.cancel(CancelReason::Requested("user".into()));

    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    controller.signal().on_cancel(move |reason| {
      *slot.lock().unwrap() = Some(reason.clone());
    });

    assert_eq!(
      *seen.lock().unwrap(),
      Some(CancelReason::Requested("user".into()))
    );
  }

  #[test]
  fn test_any_of_fires_with_source_reason() {
    let external = CancelController::new();
    let local = CancelController::new();
    let effective = CancelSignal::any_of([&external.signal(), &local.signal()]);

    assert!(!effective.is_cancelled());
    local.cancel(CancelReason::Timeout);

    assert_eq!(effective.reason(), Some(CancelReason::Timeout));
    assert!(!external.is_cancelled(), "derived signals never fire their sources");
  }

  #[test]
  fn test_any_of_with_already_fired_source() {
    let fired = CancelController::new();
    fired.cancel(CancelReason::Superseded);

    let effective = CancelSignal::any_of([&CancelSignal::never(), &fired.signal()]);

    assert_eq!(effective.reason(), Some(CancelReason::Superseded));
  }

  #[test]
  fn test_any_of_nests() {
    let outer = CancelController::new();
    let inner = CancelSignal::any_of([&outer.signal()]);
    let nested = CancelSignal::any_of([&inner, &CancelSignal::never()]);

    outer.cancel(CancelReason::Shutdown);

    assert!(nested.is_cancelled());
  }

  #[tokio::test]
  async fn test_cancelled_future_resolves() {
    let controller = CancelController::new();
    let signal = controller.signal();

    let waiter = tokio::spawn(async move { signal.cancelled().await });
    tokio::time::sleep(Duration::from_millis(5)).await;
    controller.cancel(CancelReason::Superseded);

    assert_eq!(waiter.await.unwrap(), CancelReason::Superseded);
  }

  #[test]
  fn test_dropped_any_of_releases_source_listeners() {
    let shutdown = CancelController::new();
    let long_lived = shutdown.signal();

    for _ in 0..100 {
      let local = CancelController::new();
      let effective = CancelSignal::any_of([&long_lived, &local.signal()]);
      assert_eq!(long_lived.pending_listeners(), 1);
      drop(effective);
    }

    assert_eq!(long_lived.pending_listeners(), 0);
  }

  #[test]
  fn test_live_any_of_still_fires_after_siblings_drop() {
    let shutdown = CancelController::new();
    let kept = CancelSignal::any_of([&shutdown.signal()]);
    drop(CancelSignal::any_of([&shutdown.signal()]));

    assert_eq!(shutdown.signal().pending_listeners(), 1);
    shutdown.cancel(CancelReason::Shutdown);
    assert_eq!(kept.reason(), Some(CancelReason::Shutdown));
  }
}
