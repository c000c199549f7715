//! Cache layer that orchestrates caching logic with network fetching.

use chrono::Duration;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;

use super::traits::{CacheResult, Cacheable, PinnedKeys};
use super::ttl::TtlCache;
use crate::clock::SharedClock;
use crate::error::Result;

/// How old cached data may be before it's revalidated or ignored.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
  /// Served without touching the network
  pub fresh_ttl: Duration,
  /// Served immediately while revalidating in the background
  pub offline_ttl: Duration,
}

impl Default for FreshnessPolicy {
  fn default() -> Self {
    Self {
      fresh_ttl: Duration::minutes(5),
      offline_ttl: Duration::hours(24),
    }
  }
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the network client,
/// providing transparent caching with offline support. Reads always resolve:
/// fresh, stale, or the empty default.
pub struct CacheLayer<V: Cacheable> {
  cache: Arc<TtlCache<V>>,
  clock: SharedClock,
  policy: FreshnessPolicy,
  /// Keys with a background revalidation in flight
  refreshing: Arc<DashMap<String, ()>>,
  pins: Option<Arc<dyn PinnedKeys>>,
}

impl<V: Cacheable> CacheLayer<V> {
  /// Create a new cache layer over an opened cache.
  pub fn new(cache: TtlCache<V>, clock: SharedClock) -> Self {
    Self {
      cache: Arc::new(cache),
      clock,
      policy: FreshnessPolicy::default(),
      refreshing: Arc::new(DashMap::new()),
      pins: None,
    }
  }

  /// Protect keys with unconfirmed local changes from network results.
  pub fn with_pins(mut self, pins: Arc<dyn PinnedKeys>) -> Self {
    self.pins = Some(pins);
    self
  }

  pub fn with_policy(mut self, policy: FreshnessPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn policy(&self) -> FreshnessPolicy {
    self.policy
  }

  /// Underlying cache, for optimistic writes and pruning.
  pub fn cache(&self) -> &TtlCache<V> {
    &self.cache
  }

  /// Whether a background revalidation for `key` is still running.
  pub fn is_refreshing(&self, key: &str) -> bool {
    self.refreshing.contains_key(key)
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Fresh hit - return immediately, no network
  /// 2. Stale but within the offline TTL - return it now, revalidate in background
  /// 3. Missing or too old - fetch; on a fallback-class failure serve whatever
  ///    is cached (any age), or the empty default
  ///
  /// A pinned key with a cached value is served as-is and never revalidated.
  pub async fn fetch<F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<V>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>> + Send + 'static,
  {
    let now = self.clock.now();
    let cached = self.cache.get_entry(key).await;

    if let Some(entry) = &cached {
      if entry.is_fresh(now, self.policy.fresh_ttl) {
        return Ok(CacheResult::from_cache(
          entry.value.clone(),
          entry.cached_at,
          false,
        ));
      }

      if is_pinned(self.pins.as_deref(), key).await {
        tracing::debug!(namespace = V::namespace(), key, "local changes pending, not revalidating");
        return Ok(CacheResult::from_cache(
          entry.value.clone(),
          entry.cached_at,
          true,
        ));
      }

      if entry.is_fresh(now, self.policy.offline_ttl) {
        self.spawn_revalidate(key, fetcher());
        return Ok(CacheResult::from_cache(
          entry.value.clone(),
          entry.cached_at,
          true,
        ));
      }
    }

    match fetcher().await {
      Ok(data) => Ok(self.store_fetched(key, data).await),
      Err(e) if e.is_fallback() => {
        tracing::debug!(namespace = V::namespace(), key, error = %e, "serving offline value");
        Ok(match cached {
          Some(entry) => CacheResult::offline(entry.value, entry.cached_at),
          None => CacheResult::empty(),
        })
      }
      Err(e) => Err(e),
    }
  }

  /// Bypass freshness and go to the network (pull-to-refresh).
  ///
  /// Falls back exactly like `fetch` when the network is unavailable.
  pub async fn refresh<F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<V>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>> + Send + 'static,
  {
    match fetcher().await {
      Ok(data) => Ok(self.store_fetched(key, data).await),
      Err(e) if e.is_fallback() => Ok(match self.cache.get_entry(key).await {
        Some(entry) => CacheResult::offline(entry.value, entry.cached_at),
        None => CacheResult::empty(),
      }),
      Err(e) => Err(e),
    }
  }

  /// Cache what the network returned, unless `key` got pinned meanwhile.
  async fn store_fetched(&self, key: &str, data: V) -> CacheResult<V> {
    if is_pinned(self.pins.as_deref(), key).await {
      if let Some(entry) = self.cache.get_entry(key).await {
        tracing::debug!(namespace = V::namespace(), key, "keeping local value over network result");
        let stale = !entry.is_fresh(self.clock.now(), self.policy.fresh_ttl);
        return CacheResult::from_cache(entry.value, entry.cached_at, stale);
      }
    }
    self.cache.put(key, data.clone()).await;
    CacheResult::from_network(data)
  }

  /// Revalidate `key` in the background unless one is already running.
  fn spawn_revalidate<Fut>(&self, key: &str, fut: Fut)
  where
    Fut: Future<Output = Result<V>> + Send + 'static,
  {
    let should_run = match self.refreshing.entry(key.to_string()) {
      dashmap::mapref::entry::Entry::Vacant(v) => {
        v.insert(());
        true
      }
      dashmap::mapref::entry::Entry::Occupied(_) => false,
    };
    if !should_run {
      return;
    }

    let cache = Arc::clone(&self.cache);
    let refreshing = Arc::clone(&self.refreshing);
    let pins = self.pins.clone();
    let key = key.to_string();
    tokio::spawn(async move {
      match fut.await {
        Ok(data) => {
          if is_pinned(pins.as_deref(), &key).await {
            tracing::debug!(namespace = V::namespace(), key = %key, "dropping revalidation of pinned key");
          } else {
            cache.put(&key, data).await;
          }
        }
        Err(e) => {
          tracing::debug!(namespace = V::namespace(), key = %key, error = %e, "background revalidation failed")
        }
      }
      refreshing.remove(&key);
    });
  }
}

impl<V: Cacheable> Clone for CacheLayer<V> {
  fn clone(&self) -> Self {
    Self {
      cache: Arc::clone(&self.cache),
      clock: Arc::clone(&self.clock),
      policy: self.policy,
      refreshing: Arc::clone(&self.refreshing),
      pins: self.pins.clone(),
    }
  }
}

async fn is_pinned(pins: Option<&dyn PinnedKeys>, key: &str) -> bool {
  match pins {
    Some(pins) => pins.is_pinned(key).await,
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::clock::ManualClock;
  use crate::error::SyncError;
  use crate::store::Store;
  use chrono::{TimeZone, Utc};
  use async_trait::async_trait;
  use serde::{Deserialize, Serialize};
  use std::collections::HashSet;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
  struct Note(String);

  impl Cacheable for Note {
    fn namespace() -> &'static str {
      "notes"
    }
  }

  #[derive(Default)]
  struct Pins(Mutex<HashSet<String>>);

  impl Pins {
    fn pin(&self, key: &str) {
      self.0.lock().unwrap().insert(key.to_string());
    }
  }

  #[async_trait]
  impl PinnedKeys for Pins {
    async fn is_pinned(&self, key: &str) -> bool {
      self.0.lock().unwrap().contains(key)
    }
  }

  async fn setup() -> (CacheLayer<Note>, ManualClock) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap());
    let cache = TtlCache::open(Store::memory("notes"), Arc::new(clock.clone())).await;
    (CacheLayer::new(cache, Arc::new(clock.clone())), clock)
  }

  fn ok(calls: &Arc<AtomicUsize>, text: &str) -> impl Future<Output = Result<Note>> + Send + 'static {
    calls.fetch_add(1, Ordering::SeqCst);
    let note = Note(text.to_string());
    async move { Ok(note) }
  }

  fn offline(calls: &Arc<AtomicUsize>) -> impl Future<Output = Result<Note>> + Send + 'static {
    calls.fetch_add(1, Ordering::SeqCst);
    async { Err(SyncError::NetworkUnavailable("connection refused".into())) }
  }

  #[tokio::test]
  async fn test_miss_fetches_then_hit_uses_cache() {
    let (layer, clock) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let first = layer.fetch("2025-06-01", || ok(&calls, "network")).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);

    clock.advance(Duration::minutes(1));
    let second = layer.fetch("2025-06-01", || ok(&calls, "unused")).await.unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data, Note("network".into()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_served_while_revalidating() {
    let (layer, clock) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));
    layer.cache().put("k", Note("old".into())).await;
    clock.advance(Duration::minutes(30));

    let result = layer.fetch("k", || ok(&calls, "new")).await.unwrap();
    assert_eq!(result.source, CacheSource::CacheStale);
    assert_eq!(result.data, Note("old".into()));

    while layer.is_refreshing("k") {
      tokio::task::yield_now().await;
    }
    assert_eq!(layer.cache().get("k").await, Some(Note("new".into())));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_offline_serves_expired_value() {
    let (layer, clock) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));
    layer.cache().put("k", Note("ancient".into())).await;
    clock.advance(Duration::days(3));

    let result = layer.fetch("k", || offline(&calls)).await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, Note("ancient".into()));
  }

  #[tokio::test]
  async fn test_offline_with_nothing_cached_serves_default() {
    let (layer, _) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let result = layer.fetch("k", || offline(&calls)).await.unwrap();
    assert_eq!(result.source, CacheSource::Default);
    assert_eq!(result.data, Note::default());
  }

  #[tokio::test]
  async fn test_unauthenticated_propagates() {
    let (layer, _) = setup().await;
    let result = layer
      .fetch("k", || async { Err::<Note, _>(SyncError::Unauthenticated) })
      .await;
    assert_eq!(result.unwrap_err(), SyncError::Unauthenticated);
  }

  #[tokio::test]
  async fn test_pinned_key_keeps_local_value() {
    let (layer, clock) = setup().await;
    let pins = Arc::new(Pins::default());
    let layer = layer.with_pins(pins.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    pins.pin("mine");
    layer.cache().put("mine", Note("local edit".into())).await;
    clock.advance(Duration::days(2));

    let read = layer.fetch("mine", || ok(&calls, "server copy")).await.unwrap();
    assert_eq!(read.source, CacheSource::CacheStale);
    assert_eq!(read.data, Note("local edit".into()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!layer.is_refreshing("mine"));

    let refreshed = layer.refresh("mine", || ok(&calls, "server copy")).await.unwrap();
    assert_eq!(refreshed.data, Note("local edit".into()));
    assert_eq!(layer.cache().get("mine").await, Some(Note("local edit".into())));

    let other = layer.fetch("theirs", || ok(&calls, "server copy")).await.unwrap();
    assert_eq!(other.source, CacheSource::Network);
    assert_eq!(layer.cache().get("theirs").await, Some(Note("server copy".into())));
  }

  #[tokio::test]
  async fn test_revalidation_does_not_clobber_key_pinned_meanwhile() {
    let (layer, clock) = setup().await;
    let pins = Arc::new(Pins::default());
    let layer = layer.with_pins(pins.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    layer.cache().put("k", Note("old".into())).await;
    clock.advance(Duration::minutes(30));

    let result = layer.fetch("k", || ok(&calls, "server copy")).await.unwrap();
    assert_eq!(result.source, CacheSource::CacheStale);

    // Local write lands before the background fetch completes
    pins.pin("k");
    layer.cache().put("k", Note("local edit".into())).await;

    while layer.is_refreshing("k") {
      tokio::task::yield_now().await;
    }
    assert_eq!(layer.cache().get("k").await, Some(Note("local edit".into())));
  }
}
