//! Single-flight guard for token refresh.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use tokio::sync::broadcast;

use crate::auth::AuthSession;
use crate::error::{Result, SyncError};

type Shared = Result<AuthSession>;

/// Coalesces concurrent refreshes of the same session into one call.
///
/// The first caller for a session identity runs the refresh; everyone who
/// arrives while it is in flight waits for and shares its result.
#[derive(Default)]
pub(crate) struct RefreshGate {
  inflight: DashMap<String, broadcast::Sender<Shared>>,
}

enum Role {
  Leader(broadcast::Sender<Shared>),
  Follower(broadcast::Receiver<Shared>),
}

/// Clears the in-flight slot even if the leader is cancelled.
struct InflightSlot<'a> {
  map: &'a DashMap<String, broadcast::Sender<Shared>>,
  key: &'a str,
}

impl Drop for InflightSlot<'_> {
  fn drop(&mut self) {
    self.map.remove(self.key);
  }
}

impl RefreshGate {
  pub(crate) async fn run<F, Fut>(&self, session_id: &str, refresh: F) -> Shared
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Shared>,
  {
    // Entry lock is held only for this block
    let role = match self.inflight.entry(session_id.to_string()) {
      Entry::Occupied(o) => Role::Follower(o.get().subscribe()),
      Entry::Vacant(v) => {
        let (tx, _rx) = broadcast::channel(1);
        v.insert(tx.clone());
        Role::Leader(tx)
      }
    };

    match role {
      Role::Follower(mut rx) => match rx.recv().await {
        Ok(result) => result,
        Err(_) => Err(SyncError::NetworkUnavailable(
          "token refresh was interrupted".to_string(),
        )),
      },
      Role::Leader(tx) => {
        let slot = InflightSlot {
          map: &self.inflight,
          key: session_id,
        };
        let result = refresh().await;
        drop(slot);

        // No receivers just means nobody was waiting
        let _ = tx.send(result.clone());
        result
      }
    }
  }

  #[cfg(test)]
  pub(crate) fn in_flight(&self) -> usize {
    self.inflight.len()
  }
}
