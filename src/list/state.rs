//! Pagination state and the phases derived from it.

use crate::cache::CacheSource;
use crate::fetch::FetchError;

/// Where the list is in its load/error cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// No fetch cycle has started yet
  Idle,
  /// Loading the first page into an empty list
  LoadingInitial,
  /// Loading while items are shown (next page, refresh, retry)
  LoadingMore,
  /// Idle with the latest page merged
  Loaded,
  /// Last cycle failed and there is nothing to show
  ErrorEmpty,
  /// Last cycle failed but earlier pages are still shown
  ErrorPartial,
}

/// A failure as presented to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
  pub message: String,
  /// Whether retrying could help (false for client errors and bad payloads)
  pub can_retry: bool,
  pub error: FetchError,
}

impl From<FetchError> for ErrorInfo {
  fn from(error: FetchError) -> Self {
    let can_retry = match &error {
      FetchError::Client(_) | FetchError::Decode(_) | FetchError::InvalidUrl(_) => false,
      FetchError::Timeout(_)
      | FetchError::Server(_)
      | FetchError::Connection(_)
      | FetchError::RetriesExhausted { .. }
      | FetchError::Cancelled(_) => true,
    };
    let message = match &error {
      FetchError::Connection(_) => "Connection failed. Check your internet connection.".to_string(),
      other => other.to_string(),
    };
    Self {
      message,
      can_retry,
      error,
    }
  }
}

/// State owned by a list controller.
#[derive(Debug, Clone)]
pub struct PaginationState<T> {
  /// Offset of the page the current or last cycle targets
  pub offset: usize,
  /// Loaded items, unique by identity key, in first-seen order
  pub items: Vec<T>,
  pub loading: bool,
  pub error: Option<ErrorInfo>,
  /// Source of the most recently merged page
  pub last_source: Option<CacheSource>,
  started: bool,
}

impl<T> Default for PaginationState<T> {
  fn default() -> Self {
    Self {
      offset: 0,
      items: Vec::new(),
      loading: false,
      error: None,
      last_source: None,
      started: false,
    }
  }
}

impl<T> PaginationState<T> {
  pub(crate) fn begin(&mut self) {
    self.started = true;
    self.loading = true;
  }

  pub fn phase(&self) -> Phase {
    if !self.started {
      Phase::Idle
    } else if self.loading {
      if self.items.is_empty() {
        Phase::LoadingInitial
      } else {
        Phase::LoadingMore
      }
    } else if self.error.is_some() {
      if self.items.is_empty() {
        Phase::ErrorEmpty
      } else {
        Phase::ErrorPartial
      }
    } else {
      Phase::Loaded
    }
  }

  /// Snapshot for the presentation layer.
  pub fn view(&self) -> ListView<'_, T> {
    ListView {
      items: &self.items,
      loading: self.loading,
      error: self.error.as_ref(),
      offset: self.offset,
    }
  }
}

/// What the presentation layer renders.
#[derive(Debug)]
pub struct ListView<'a, T> {
  pub items: &'a [T],
  pub loading: bool,
  pub error: Option<&'a ErrorInfo>,
  pub offset: usize,
}
