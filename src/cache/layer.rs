//! Two-tier TTL cache: an in-memory map in front of a durable store.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::storage::DurableStore;

/// Source of "now" in milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
  Arc::new(|| Utc::now().timestamp_millis())
}

/// Two-tier cache keyed by caller-supplied strings.
///
/// Reads check the in-memory tier, then the durable tier, promoting durable hits
/// into memory. Writes go to memory first and then, best-effort, to the durable
/// tier. Expired entries read as absent but are never swept; they are replaced
/// by the next write to the same key.
pub struct TtlCache<S: DurableStore> {
  memory: Arc<Mutex<HashMap<String, CacheEntry>>>,
  store: Arc<S>,
  /// TTL applied by `set`
  default_ttl: Duration,
  clock: Clock,
}

impl<S: DurableStore> TtlCache<S> {
  /// Create a cache over the given durable store with a 30 minute default TTL.
  pub fn new(store: S) -> Self {
    Self {
      memory: Arc::new(Mutex::new(HashMap::new())),
      store: Arc::new(store),
      default_ttl: Duration::minutes(30),
      clock: system_clock(),
    }
  }

  /// Set the TTL used by `set`.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Replace the clock, mostly useful in tests.
  pub fn with_clock(mut self, clock: Clock) -> Self {
    self.clock = clock;
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Access the durable tier directly.
  pub fn store(&self) -> &S {
    &self.store
  }

  fn now_ms(&self) -> i64 {
    (self.clock)()
  }

  fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self.memory.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn memory_get(&self, key: &str, now_ms: i64) -> Option<Value> {
    self
      .memory()
      .get(key)
      .filter(|entry| entry.is_valid_at(now_ms))
      .map(|entry| entry.data.clone())
  }

  /// Look up a valid value for `key`.
  ///
  /// Never fails: durable read errors and undecodable entries count as a miss.
  pub async fn get(&self, key: &str) -> Option<Value> {
    if let Some(data) = self.memory_get(key, self.now_ms()) {
      debug!(key, "memory cache hit");
      return Some(data);
    }

    let raw = match self.store.read(key).await {
      Ok(Some(raw)) => raw,
      Ok(None) => {
        debug!(key, "cache miss");
        return None;
      }
      Err(e) => {
        warn!(key, error = %e, "durable cache read failed, treating as miss");
        return None;
      }
    };

    let entry: CacheEntry = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "undecodable durable cache entry, treating as miss");
        return None;
      }
    };

    if !entry.is_valid_at(self.now_ms()) {
      debug!(key, expires = entry.expires_at_ms, "durable cache entry expired");
      return None;
    }

    let data = entry.data.clone();
    self.promote(key, entry);
    debug!(key, "durable cache hit, promoted to memory");
    Some(data)
  }

  /// Promote a durable entry unless a write landed in memory while we were reading.
  fn promote(&self, key: &str, entry: CacheEntry) {
    let mut memory = self.memory();
    match memory.get(key) {
      Some(existing) if existing.expires_at_ms >= entry.expires_at_ms => {}
      _ => {
        memory.insert(key.to_string(), entry);
      }
    }
  }

  /// Store `data` under `key` with the default TTL.
  pub async fn set(&self, key: &str, data: Value) {
    self.set_with_ttl(key, data, self.default_ttl).await
  }

  /// Store `data` under `key`, expiring `ttl` from now.
  ///
  /// The in-memory write always happens; a failed durable write is logged and
  /// the in-memory copy stays authoritative.
  pub async fn set_with_ttl(&self, key: &str, data: Value, ttl: Duration) {
    let entry = CacheEntry::new(data, self.now_ms(), ttl.num_milliseconds());
    let encoded = serde_json::to_string(&entry);

    self.memory().insert(key.to_string(), entry);

    match encoded {
      Ok(encoded) => {
        if let Err(e) = self.store.write(key, &encoded).await {
          warn!(key, error = %e, "durable cache write failed");
        }
      }
      Err(e) => warn!(key, error = %e, "failed to encode cache entry"),
    }
  }

  /// Inspect the in-memory entry for `key`, valid or not.
  pub fn memory_entry(&self, key: &str) -> Option<CacheEntry> {
    self.memory().get(key).cloned()
  }

  /// Drop the in-memory tier, as a process restart would.
  pub fn clear_memory(&self) {
    self.memory().clear();
  }
}

impl<S: DurableStore> Clone for TtlCache<S> {
  fn clone(&self) -> Self {
    Self {
      memory: Arc::clone(&self.memory),
      store: Arc::clone(&self.store),
      default_ttl: self.default_ttl,
      clock: Arc::clone(&self.clock),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStore;
  use color_eyre::{eyre::eyre, Result};
  use serde_json::json;
  use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

  fn manual_clock(start: i64) -> (Clock, Arc<AtomicI64>) {
    let now = Arc::new(AtomicI64::new(start));
    let handle = Arc::clone(&now);
    (Arc::new(move || handle.load(Ordering::SeqCst)), now)
  }

  /// Counts durable reads and can be told to fail.
  #[derive(Default)]
  struct ProbeStore {
    inner: MemoryStore,
    reads: AtomicUsize,
    fail: bool,
  }

  impl DurableStore for ProbeStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
      self.reads.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        return Err(eyre!("disk on fire"));
      }
      self.inner.read(key).await
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
      if self.fail {
        return Err(eyre!("disk on fire"));
      }
      self.inner.write(key, value).await
    }
  }

  #[tokio::test]
  async fn test_get_returns_value_until_expiry() {
    let (clock, now) = manual_clock(10_000);
    let cache = TtlCache::new(MemoryStore::new()).with_clock(clock);

    cache
      .set_with_ttl("k", json!({"v": 1}), Duration::milliseconds(1_000))
      .await;

    now.store(10_999, Ordering::SeqCst);
    assert_eq!(cache.get("k").await, Some(json!({"v": 1})));

    now.store(11_000, Ordering::SeqCst);
    assert_eq!(cache.get("k").await, None);
  }

  #[tokio::test]
  async fn test_expired_entry_is_not_deleted() {
    let (clock, now) = manual_clock(0);
    let cache = TtlCache::new(MemoryStore::new()).with_clock(clock);

    cache.set_with_ttl("k", json!(1), Duration::milliseconds(5)).await;
    now.store(50, Ordering::SeqCst);

    assert_eq!(cache.get("k").await, None);
    assert!(cache.memory_entry("k").is_some());
    assert_eq!(cache.store().len(), 1);
  }

  #[tokio::test]
  async fn test_durable_hit_is_promoted_to_memory() {
    let (clock, _now) = manual_clock(0);
    let cache = TtlCache::new(ProbeStore::default()).with_clock(clock);

    cache.set("list-0", json!(["bulbasaur"])).await;
    cache.clear_memory();

    assert_eq!(cache.get("list-0").await, Some(json!(["bulbasaur"])));
    assert_eq!(cache.store().reads.load(Ordering::SeqCst), 1);

    assert_eq!(cache.get("list-0").await, Some(json!(["bulbasaur"])));
    assert_eq!(
      cache.store().reads.load(Ordering::SeqCst),
      1,
      "second read must be served from memory"
    );
  }

  #[tokio::test]
  async fn test_expired_durable_entry_is_absent() {
    let (clock, now) = manual_clock(0);
    let cache = TtlCache::new(MemoryStore::new()).with_clock(clock);

    cache.set_with_ttl("k", json!(1), Duration::milliseconds(10)).await;
    cache.clear_memory();
    now.store(10, Ordering::SeqCst);

    assert_eq!(cache.get("k").await, None);
    assert!(cache.memory_entry("k").is_none(), "expired entries are not promoted");
  }

  #[tokio::test]
  async fn test_store_failures_are_swallowed() {
    let store = ProbeStore {
      fail: true,
      ..Default::default()
    };
    let cache = TtlCache::new(store);

    cache.set("k", json!("kept in memory")).await;
    assert_eq!(cache.get("k").await, Some(json!("kept in memory")));

    cache.clear_memory();
    assert_eq!(cache.get("k").await, None);
  }

  #[tokio::test]
  async fn test_undecodable_durable_entry_is_a_miss() {
    let cache = TtlCache::new(MemoryStore::new());
    cache.store().write("k", "not json").await.unwrap();

    assert_eq!(cache.get("k").await, None);
  }

  #[tokio::test]
  async fn test_last_set_wins_and_ttl_resets() {
    let (clock, now) = manual_clock(0);
    let cache = TtlCache::new(MemoryStore::new()).with_clock(clock);

    cache.set_with_ttl("k", json!(1), Duration::milliseconds(10)).await;
    now.store(8, Ordering::SeqCst);
    cache.set_with_ttl("k", json!(2), Duration::milliseconds(10)).await;
    now.store(15, Ordering::SeqCst);

    assert_eq!(cache.get("k").await, Some(json!(2)));
    assert_eq!(cache.memory_entry("k").unwrap().expires_at_ms, 18);
  }

  #[tokio::test]
  async fn test_default_ttl_is_thirty_minutes() {
    let (clock, _now) = manual_clock(1_000);
    let cache = TtlCache::new(MemoryStore::new()).with_clock(clock);

    cache.set("k", json!(null)).await;

    assert_eq!(
      cache.memory_entry("k").unwrap().expires_at_ms,
      1_000 + 30 * 60 * 1_000
    );
  }

  #[tokio::test]
  async fn test_returned_value_is_a_copy() {
    let cache = TtlCache::new(MemoryStore::new());
    cache.set("k", json!({"n": 1})).await;

    let mut first = cache.get("k").await.unwrap();
    first["n"] = json!(99);

    assert_eq!(cache.get("k").await, Some(json!({"n": 1})));
  }
}
