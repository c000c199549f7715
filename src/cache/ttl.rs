//! Persisted cache with per-entry freshness.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::clock::SharedClock;
use crate::store::Store;

/// A cached value and when it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
  pub value: V,
  #[serde(rename = "cachedAt")]
  pub cached_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.cached_at
  }

  /// Fresh while strictly younger than `ttl`.
  pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    self.age(now) < ttl
  }
}

/// Per-entry formats this build can read. Old builds stored the bare value;
/// those entries load as already-expired so they get revalidated.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry<V> {
  Current(CacheEntry<V>),
  Legacy(V),
}

impl<V> StoredEntry<V> {
  fn into_entry(self) -> CacheEntry<V> {
    match self {
      StoredEntry::Current(entry) => entry,
      StoredEntry::Legacy(value) => CacheEntry {
        value,
        cached_at: DateTime::<Utc>::default(),
      },
    }
  }
}

/// TTL cache over one `Store`.
///
/// The cache never imposes a TTL of its own: every freshness query takes the
/// caller's TTL. All mutations persist the full map through the store's
/// atomic replace; a failed persist is logged and the in-memory state kept.
pub struct TtlCache<V> {
  store: Store,
  clock: SharedClock,
  entries: RwLock<BTreeMap<String, CacheEntry<V>>>,
}

impl<V> TtlCache<V>
where
  V: Clone + Send + Sync + Serialize + DeserializeOwned,
{
  /// Load the cache from `store`. Undecodable entries are dropped one by one.
  pub async fn open(store: Store, clock: SharedClock) -> Self {
    let raw: BTreeMap<String, serde_json::Value> = store.load().await;
    let mut entries = BTreeMap::new();
    let mut dropped = 0usize;

    for (key, value) in raw {
      match serde_json::from_value::<StoredEntry<V>>(value) {
        Ok(stored) => {
          entries.insert(key, stored.into_entry());
        }
        Err(_) => dropped += 1,
      }
    }

    if dropped > 0 {
      tracing::warn!(store = %store.describe(), dropped, "dropped undecodable cache entries");
    }

    Self {
      store,
      clock,
      entries: RwLock::new(entries),
    }
  }

  /// Stored value regardless of freshness.
  pub async fn get(&self, key: &str) -> Option<V> {
    self.entries.read().await.get(key).map(|e| e.value.clone())
  }

  /// Stored value plus its `cached_at`.
  pub async fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
    self.entries.read().await.get(key).cloned()
  }

  /// Value only if `now - cached_at < ttl`.
  pub async fn get_fresh(&self, key: &str, ttl: Duration) -> Option<V> {
    let now = self.clock.now();
    self
      .entries
      .read()
      .await
      .get(key)
      .filter(|e| e.is_fresh(now, ttl))
      .map(|e| e.value.clone())
  }

  /// Insert or overwrite, stamping `cached_at = now`.
  pub async fn put(&self, key: &str, value: V) {
    let mut entries = self.entries.write().await;
    let now = self.clock.now();
    Self::stamp(&mut entries, key.to_string(), value, now);
    self.persist(&entries).await;
  }

  /// Insert many entries with a single persisted write.
  pub async fn put_batch<I>(&self, batch: I)
  where
    I: IntoIterator<Item = (String, V)>,
  {
    let mut entries = self.entries.write().await;
    let now = self.clock.now();
    let mut touched = 0usize;
    for (key, value) in batch {
      Self::stamp(&mut entries, key, value, now);
      touched += 1;
    }
    if touched > 0 {
      self.persist(&entries).await;
    }
  }

  /// Keys from `keys` that are missing or not fresh under `ttl`.
  pub async fn stale_keys(&self, keys: &[String], ttl: Duration) -> Vec<String> {
    let now = self.clock.now();
    let entries = self.entries.read().await;
    keys
      .iter()
      .filter(|k| !entries.get(k.as_str()).is_some_and(|e| e.is_fresh(now, ttl)))
      .cloned()
      .collect()
  }

  /// Remove entries strictly older than `max_age`. Returns how many went.
  pub async fn prune(&self, max_age: Duration) -> usize {
    self.prune_unless(max_age, |_| false).await
  }

  /// Like `prune`, but keys for which `keep` is true survive regardless of age.
  pub async fn prune_unless<F>(&self, max_age: Duration, keep: F) -> usize
  where
    F: Fn(&str) -> bool,
  {
    let mut entries = self.entries.write().await;
    let now = self.clock.now();
    let before = entries.len();
    entries.retain(|k, e| e.age(now) <= max_age || keep(k));
    let removed = before - entries.len();

    if removed > 0 {
      tracing::debug!(store = %self.store.describe(), removed, "pruned cache entries");
      self.persist(&entries).await;
    }
    removed
  }

  pub async fn remove(&self, key: &str) -> Option<V> {
    let mut entries = self.entries.write().await;
    let removed = entries.remove(key).map(|e| e.value);
    if removed.is_some() {
      self.persist(&entries).await;
    }
    removed
  }

  pub async fn len(&self) -> usize {
    self.entries.read().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.entries.read().await.is_empty()
  }

  /// Keep `cached_at` non-decreasing per key even if the wall clock steps back.
  fn stamp(
    entries: &mut BTreeMap<String, CacheEntry<V>>,
    key: String,
    value: V,
    now: DateTime<Utc>,
  ) {
    let cached_at = match entries.get(&key) {
      Some(prev) if prev.cached_at > now => prev.cached_at,
      _ => now,
    };
    entries.insert(key, CacheEntry { value, cached_at });
  }

  async fn persist(&self, entries: &BTreeMap<String, CacheEntry<V>>) {
    if let Err(e) = self.store.save(entries).await {
      tracing::warn!(store = %self.store.describe(), error = %e, "failed to persist cache");
    }
  }
}
