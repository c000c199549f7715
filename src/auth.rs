//! Bearer-token session and its persistence.
//!
//! Ordinary requests only read the session. It changes through sign-in,
//! sign-out, and the executor's refresh flow.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::store::Store;

/// Access/refresh token pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
  pub access_token: String,
  pub refresh_token: String,
}

impl AuthSession {
  pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
    Self {
      access_token: access_token.into(),
      refresh_token: refresh_token.into(),
    }
  }

  /// Stable, non-secret identifier for this session, safe to log.
  pub fn identity(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.refresh_token.as_bytes());
    hex::encode(&hasher.finalize()[..8])
  }
}

impl std::fmt::Debug for AuthSession {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AuthSession")
      .field("identity", &self.identity())
      .finish_non_exhaustive()
  }
}

/// Persisted holder of the current session.
pub struct SessionStore {
  store: Store,
  current: RwLock<Option<AuthSession>>,
}

impl SessionStore {
  pub async fn open(store: Store) -> Self {
    let current: Option<AuthSession> = store.load().await;
    Self {
      store,
      current: RwLock::new(current),
    }
  }

  /// The session requests should use, if signed in.
  pub async fn current(&self) -> Option<AuthSession> {
    self.current.read().await.clone()
  }

  pub async fn is_signed_in(&self) -> bool {
    self.current.read().await.is_some()
  }

  pub async fn sign_in(&self, session: AuthSession) -> Result<()> {
    let mut current = self.current.write().await;
    self.store.save(&Some(&session)).await?;
    tracing::info!(session = %session.identity(), "signed in");
    *current = Some(session);
    Ok(())
  }

  pub async fn sign_out(&self) -> Result<()> {
    let mut current = self.current.write().await;
    if let Some(old) = current.take() {
      tracing::info!(session = %old.identity(), "signed out");
    }
    self.store.save(&None::<AuthSession>).await
  }

  /// Install tokens returned by the refresh endpoint.
  ///
  /// The new tokens are used in memory even if persisting them fails, so the
  /// in-flight retry still works; the next launch would have to sign in again.
  pub(crate) async fn replace_after_refresh(&self, session: AuthSession) {
    let mut current = self.current.write().await;
    if let Err(e) = self.store.save(&Some(&session)).await {
      tracing::warn!(session = %session.identity(), error = %e, "failed to persist refreshed session");
    }
    *current = Some(session);
  }
}
