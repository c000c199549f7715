//! Error taxonomy for the sync layer.
//!
//! Only the executor surfaces hard errors to callers. The cache and the
//! write queue degrade to "treat as empty" and log instead of returning these.

use thiserror::Error;

/// Errors produced by the sync layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
  /// Refresh failed or no session exists. Callers should force a sign-out.
  #[error("unauthenticated: session is missing or could not be refreshed")]
  Unauthenticated,

  /// Transient failure: unreachable host, timeout, 5xx.
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),

  /// The server rejected the request. Retrying would fail again.
  #[error("server rejected request ({status}): {message}")]
  ServerRejected { status: u16, message: String },

  /// The response could not be decoded. Usually client/server version skew.
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// Local persistence failed.
  #[error("storage error: {0}")]
  Storage(String),
}

impl SyncError {
  /// Whether the caller should fall back to cache (reads) or the queue (writes).
  pub fn is_fallback(&self) -> bool {
    matches!(self, SyncError::NetworkUnavailable(_) | SyncError::Decode(_))
  }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, SyncError>;
