//! Resilient HTTP fetching.
//!
//! A fetch is a loop of attempts. Each attempt is bound to the caller's
//! cancellation signal combined with its own deadline; failures are classified
//! into [`FetchError`] and a [`RetryPolicy`] decides whether to back off and try
//! again. Only terminal outcomes leave [`ResilientClient::fetch`].

mod backoff;
mod cancel;
mod client;
mod error;
mod transport;

pub use backoff::{Backoff, RetryDecision, RetryPolicy};
pub use cancel::{CancelController, CancelReason, CancelSignal};
pub use client::ResilientClient;
pub use error::{classify, AttemptOutcome, FetchError};
pub use transport::{HttpResponse, ReqwestTransport, Transport, TransportError};

#[cfg(test)]
pub(crate) use client::tests::{Reply, ScriptedTransport};
