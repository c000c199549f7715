use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};

/// Location of every file the sync layer owns.
#[derive(Debug, Clone)]
pub struct DataDir {
  root: PathBuf,
}

impl DataDir {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Open the data directory, creating it if needed.
  ///
  /// Uses `explicit` if given, otherwise the platform data directory.
  pub fn open(explicit: Option<&Path>) -> Result<Self> {
    let root = match explicit {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    std::fs::create_dir_all(&root)
      .map_err(|e| eyre!("Failed to create data directory {}: {}", root.display(), e))?;

    Ok(Self { root })
  }

  /// Get the default data path
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("journal-sync"))
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Cache file for one entity namespace (e.g. "entries", "plans").
  pub fn cache_file(&self, namespace: &str) -> PathBuf {
    self.root.join(format!("{}.json", namespace))
  }

  pub fn pending_ops_file(&self) -> PathBuf {
    self.root.join("pending_ops.json")
  }

  pub fn session_file(&self) -> PathBuf {
    self.root.join("session.json")
  }

  pub fn flags_file(&self) -> PathBuf {
    self.root.join("flags.json")
  }

  pub fn log_dir(&self) -> PathBuf {
    self.root.join("logs")
  }
}
