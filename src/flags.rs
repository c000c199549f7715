//! Small locally-tracked UI toggles, kept in their own file.

use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::store::Store;

/// Named on/off switches that never leave the device.
///
/// Loading is corrupt-tolerant on its own: a damaged flags file resets the
/// flags and nothing else.
pub struct LocalFlags {
  store: Store,
  flags: RwLock<BTreeMap<String, bool>>,
}

impl LocalFlags {
  pub async fn open(store: Store) -> Self {
    let flags = store.load().await;
    Self {
      store,
      flags: RwLock::new(flags),
    }
  }

  /// Unset flags read as false.
  pub async fn get(&self, name: &str) -> bool {
    self.flags.read().await.get(name).copied().unwrap_or(false)
  }

  pub async fn set(&self, name: &str, on: bool) -> Result<()> {
    let mut flags = self.flags.write().await;
    flags.insert(name.to_string(), on);
    self.store.save(&*flags).await
  }

  pub async fn all(&self) -> BTreeMap<String, bool> {
    self.flags.read().await.clone()
  }
}
