//! Byte-level storage backends with atomic replace semantics.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// A single persisted blob. Writes must be all-or-nothing.
#[async_trait]
pub trait StorageBackend: Send + Sync {
  /// Read the last committed contents, `None` if nothing was ever written.
  async fn read(&self) -> Result<Option<Vec<u8>>>;

  /// Replace the contents. Readers see either the old or the new bytes, never a mix.
  async fn write(&self, bytes: &[u8]) -> Result<()>;

  /// Human-readable location for logs.
  fn describe(&self) -> String;
}

/// File-backed storage using write-to-temp then rename.
#[derive(Debug, Clone)]
pub struct FileBackend {
  path: PathBuf,
}

impl FileBackend {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Unique sibling path so concurrent writers never share a temp file.
  fn temp_path(&self) -> PathBuf {
    self
      .path
      .with_extension(format!("{}.tmp", Uuid::new_v4().simple()))
  }

  async fn write_and_rename(&self, temp: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(temp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(temp, &self.path).await
  }
}

#[async_trait]
impl StorageBackend for FileBackend {
  async fn read(&self) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(&self.path).await {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(SyncError::Storage(format!(
        "Failed to read {}: {}",
        self.path.display(),
        e
      ))),
    }
  }

  async fn write(&self, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(|e| {
        SyncError::Storage(format!(
          "Failed to create directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let temp = self.temp_path();
    if let Err(e) = self.write_and_rename(&temp, bytes).await {
      // Best effort; a leftover temp file is ignored by `read` anyway
      let _ = tokio::fs::remove_file(&temp).await;
      return Err(SyncError::Storage(format!(
        "Failed to write {}: {}",
        self.path.display(),
        e
      )));
    }

    Ok(())
  }

  fn describe(&self) -> String {
    self.path.display().to_string()
  }
}

/// In-process backend for ephemeral stores and tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
  name: String,
  data: Mutex<Option<Vec<u8>>>,
  fail_next_write: AtomicBool,
}

impl MemoryBackend {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  /// Make the next write fail before anything is committed, as if the
  /// process died mid-write.
  pub fn fail_next_write(&self) {
    self.fail_next_write.store(true, Ordering::SeqCst);
  }

  /// Overwrite the raw contents, bypassing the codec.
  pub fn set_raw(&self, bytes: Option<Vec<u8>>) {
    *self.data.lock().unwrap_or_else(|e| e.into_inner()) = bytes;
  }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
  async fn read(&self) -> Result<Option<Vec<u8>>> {
    Ok(self.data.lock().unwrap_or_else(|e| e.into_inner()).clone())
  }

  async fn write(&self, bytes: &[u8]) -> Result<()> {
    if self.fail_next_write.swap(false, Ordering::SeqCst) {
      return Err(SyncError::Storage(format!(
        "simulated crash while writing {}",
        self.name
      )));
    }
    *self.data.lock().unwrap_or_else(|e| e.into_inner()) = Some(bytes.to_vec());
    Ok(())
  }

  fn describe(&self) -> String {
    format!("memory:{}", self.name)
  }
}
