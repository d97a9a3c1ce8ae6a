//! Cache-first, resilient data fetching for a paginated PokéAPI client.
//!
//! - [`cache`]: two-tier TTL cache over a durable key/value store
//! - [`fetch`]: HTTP client with per-attempt timeouts, retry with backoff and cancellation
//! - [`revalidate`]: stale-while-revalidate loading on top of both
//! - [`list`]: paginated list state machine with request supersession
//! - [`pokeapi`]: PokéAPI types and lookups

pub mod cache;
pub mod config;
pub mod fetch;
pub mod list;
pub mod logging;
pub mod pokeapi;
pub mod revalidate;
