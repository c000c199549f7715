//! Offline-first sync layer for a journaling client.
//!
//! Reads are served from a per-type TTL cache and fall back to stale data or
//! an empty default when the network is gone. Writes apply locally at once
//! and wait in a durable queue until the server confirms them. Every request
//! goes through one executor that refreshes an expired token at most once,
//! shared by all callers that hit the expiry together.

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod flags;
pub mod journal;
pub mod logging;
pub mod queue;
pub mod replay;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use error::{Result, SyncError};
