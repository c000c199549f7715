//! Core traits and types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Trait for values that can be cached.
///
/// Each implementor gets its own namespace, and therefore its own file, so
/// differently-shaped values under the same logical key never collide.
/// `Default` is the safe empty value served when nothing is cached and the
/// network is unavailable.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + Default + 'static {
  /// Namespace name for storage organization (e.g., "entries", "plans")
  fn namespace() -> &'static str;
}

/// Keys whose cached value carries local changes the server hasn't confirmed.
///
/// A network result never replaces a pinned key's cached value; the local
/// copy wins until the pin is lifted.
#[async_trait]
pub trait PinnedKeys: Send + Sync {
  async fn is_pinned(&self, key: &str) -> bool;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Nothing cached and the network failed.
  pub fn empty() -> Self
  where
    T: Default,
  {
    Self {
      data: T::default(),
      source: CacheSource::Default,
      cached_at: None,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past its fresh TTL
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// Offline with nothing cached, serving the empty default
  Default,
}
