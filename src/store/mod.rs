//! Persistent key-value storage for the sync layer.
//!
//! Each concern (entity cache, plans cache, pending operations, session,
//! local flags) owns exactly one `Store`, backed by its own file. Contents are
//! JSON inside a versioned envelope:
//!
//! ```json
//! { "version": 2, "saved_at": "2025-06-01T08:00:00Z", "data": { ... } }
//! ```
//!
//! Version 1 files held the bare payload with no envelope. They still load,
//! and get rewritten in the current format on the next save.

mod backend;
mod paths;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use paths::DataDir;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{Result, SyncError};

/// Envelope version written by this build.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
  version: u32,
  saved_at: DateTime<Utc>,
  data: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
  version: u32,
  #[allow(dead_code)]
  saved_at: Option<DateTime<Utc>>,
  data: T,
}

/// On-disk formats this build can read.
#[derive(Deserialize)]
#[serde(untagged)]
enum Persisted<T> {
  Current(Envelope<T>),
  Legacy(T),
}

/// A typed, crash-safe persisted value.
pub struct Store {
  backend: Arc<dyn StorageBackend>,
  write_lock: Mutex<()>,
}

impl Store {
  pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
    Self {
      backend,
      write_lock: Mutex::new(()),
    }
  }

  /// File-backed store at `path`.
  pub fn file(path: impl Into<PathBuf>) -> Self {
    Self::new(Arc::new(FileBackend::new(path)))
  }

  /// Ephemeral store that lives only as long as the process.
  pub fn memory(name: &str) -> Self {
    Self::new(Arc::new(MemoryBackend::new(name)))
  }

  pub fn describe(&self) -> String {
    self.backend.describe()
  }

  /// Load the persisted value.
  ///
  /// Never fails: a missing file yields `T::default()`, and so does a file
  /// that cannot be read or decoded (logged at warn).
  pub async fn load<T>(&self) -> T
  where
    T: DeserializeOwned + Default,
  {
    let bytes = match self.backend.read().await {
      Ok(Some(bytes)) => bytes,
      Ok(None) => return T::default(),
      Err(e) => {
        tracing::warn!(store = %self.describe(), error = %e, "unreadable store, treating as empty");
        return T::default();
      }
    };

    match serde_json::from_slice::<Persisted<T>>(&bytes) {
      Ok(Persisted::Current(envelope)) => {
        if envelope.version > SCHEMA_VERSION {
          tracing::warn!(
            store = %self.describe(),
            version = envelope.version,
            "store written by a newer build"
          );
        }
        envelope.data
      }
      Ok(Persisted::Legacy(data)) => {
        tracing::info!(store = %self.describe(), "loaded legacy store format");
        data
      }
      Err(e) => {
        tracing::warn!(store = %self.describe(), error = %e, "corrupt store, treating as empty");
        T::default()
      }
    }
  }

  /// Persist `value`, replacing the previous contents atomically.
  pub async fn save<T>(&self, value: &T) -> Result<()>
  where
    T: Serialize,
  {
    let envelope = EnvelopeRef {
      version: SCHEMA_VERSION,
      saved_at: Utc::now(),
      data: value,
    };
    let bytes = serde_json::to_vec(&envelope)
      .map_err(|e| SyncError::Storage(format!("Failed to serialize store: {}", e)))?;

    let _guard = self.write_lock.lock().await;
    self.backend.write(&bytes).await
  }
}
