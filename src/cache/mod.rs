//! Generic caching layer for data persistence and offline support.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Keeps one persisted TTL cache per value type (namespace)
//! - Lets every caller choose its own TTL for freshness checks
//! - Serves stale data immediately while revalidating in the background
//! - Provides offline mode (serve any cached value, or an empty default)
//! - Never lets a network result replace a pinned (locally modified) key

mod layer;
mod traits;
mod ttl;

pub use layer::{CacheLayer, FreshnessPolicy};
pub use traits::{CacheResult, CacheSource, Cacheable, PinnedKeys};
pub use ttl::{CacheEntry, TtlCache};
