//! Two-tier TTL cache with a pluggable durable backend.
//!
//! - In-memory tier absorbs repeat reads within a session
//! - Durable tier (SQLite by default) survives restarts
//! - Expiry is lazy: expired entries read as absent and are overwritten on the next write
//! - Storage failures degrade to cache misses and are never surfaced

mod entry;
mod layer;
mod storage;

pub use entry::{CacheEntry, CacheSource, Fetched};
pub use layer::{Clock, TtlCache};
pub use storage::{DurableStore, MemoryStore, SqliteStore};
