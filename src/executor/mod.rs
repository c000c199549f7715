//! Authenticated request executor.
//!
//! Every remote call goes through one state machine:
//!
//! ```text
//! ATTEMPT -> success                       -> DONE
//! ATTEMPT -> auth expired -> REFRESH -> RETRY -> DONE | FAILED
//! ATTEMPT -> other failure                 -> FAILED
//! ```
//!
//! A refresh happens at most once per call, and concurrent calls that hit
//! an expired token together share a single refresh.

mod envelope;
mod refresh;

pub use envelope::{ApiEnvelope, ApiError};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{AuthSession, SessionStore};
use crate::error::{Result, SyncError};
use crate::transport::{HttpMethod, HttpRequest, Transport, TransportError};
use envelope::{classify, Outcome};
use refresh::RefreshGate;

/// Path of the token refresh endpoint, relative to the API base.
pub const REFRESH_PATH: &str = "auth/refresh";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
  access_token: String,
  refresh_token: String,
}

/// Executes requests with bearer auth and transparent token refresh.
pub struct Executor {
  transport: Arc<dyn Transport>,
  sessions: Arc<SessionStore>,
  gate: RefreshGate,
}

impl Executor {
  pub fn new(transport: Arc<dyn Transport>, sessions: Arc<SessionStore>) -> Self {
    Self {
      transport,
      sessions,
      gate: RefreshGate::default(),
    }
  }

  pub fn sessions(&self) -> &Arc<SessionStore> {
    &self.sessions
  }

  /// Run `request` and return the envelope's `data` (`null` if absent).
  pub async fn execute(&self, request: &HttpRequest) -> Result<Value> {
    let session = self
      .sessions
      .current()
      .await
      .ok_or(SyncError::Unauthenticated)?;

    match self.attempt(request, &session.access_token).await {
      Outcome::Success(data) => return Ok(data),
      Outcome::Failure(e) => return Err(self.log_failure(request, e)),
      Outcome::AuthExpired => {}
    }

    tracing::debug!(
      method = request.method.as_str(),
      path = %request.path,
      session = %session.identity(),
      "access token rejected, refreshing"
    );
    let refreshed = self.refresh_after_expiry(&session).await?;

    match self.attempt(request, &refreshed.access_token).await {
      Outcome::Success(data) => Ok(data),
      Outcome::Failure(e) => Err(self.log_failure(request, e)),
      Outcome::AuthExpired => {
        tracing::warn!(
          method = request.method.as_str(),
          path = %request.path,
          "token rejected again after refresh"
        );
        Err(SyncError::Unauthenticated)
      }
    }
  }

  /// Like `execute`, decoding `data` into `T`.
  pub async fn execute_json<T>(&self, request: &HttpRequest) -> Result<T>
  where
    T: DeserializeOwned,
  {
    let data = self.execute(request).await?;
    serde_json::from_value(data).map_err(|e| {
      self.log_failure(
        request,
        SyncError::Decode(format!("unexpected response shape: {}", e)),
      )
    })
  }

  /// Run a request that needs no session, such as sign-in.
  ///
  /// An unauthorized response here means the credentials were refused.
  pub async fn execute_anonymous(&self, request: &HttpRequest) -> Result<Value> {
    match self.send(request).await {
      Outcome::Success(data) => Ok(data),
      Outcome::AuthExpired => Err(SyncError::Unauthenticated),
      Outcome::Failure(e) => Err(self.log_failure(request, e)),
    }
  }

  async fn attempt(&self, request: &HttpRequest, token: &str) -> Outcome {
    self.send(&request.with_bearer(token)).await
  }

  async fn send(&self, request: &HttpRequest) -> Outcome {
    match self.transport.send(request).await {
      Ok(response) => classify(&response),
      Err(e) => Outcome::Failure(transport_failure(e)),
    }
  }

  /// Get a usable session after `stale` was rejected.
  async fn refresh_after_expiry(&self, stale: &AuthSession) -> Result<AuthSession> {
    match self.superseded(stale).await? {
      Some(current) => Ok(current),
      None => {
        self
          .gate
          .run(&stale.identity(), || self.refresh_session(stale))
          .await
      }
    }
  }

  /// `Some(current)` if someone already replaced `stale`.
  async fn superseded(&self, stale: &AuthSession) -> Result<Option<AuthSession>> {
    match self.sessions.current().await {
      None => Err(SyncError::Unauthenticated),
      Some(current) if current.access_token != stale.access_token => Ok(Some(current)),
      Some(_) => Ok(None),
    }
  }

  async fn refresh_session(&self, stale: &AuthSession) -> Result<AuthSession> {
    // A refresh that finished between our check and taking the gate
    if let Some(current) = self.superseded(stale).await? {
      return Ok(current);
    }

    let request = HttpRequest::new(HttpMethod::Post, REFRESH_PATH)
      .with_body(json!({ "refreshToken": stale.refresh_token }));

    let data = match self.send(&request).await {
      Outcome::Success(data) => data,
      // Could not reach the server; the session may still be fine
      Outcome::Failure(e @ SyncError::NetworkUnavailable(_)) => {
        tracing::warn!(session = %stale.identity(), error = %e, "token refresh unreachable");
        return Err(e);
      }
      Outcome::Failure(e) => return Err(self.reject_session(stale, &e.to_string()).await),
      Outcome::AuthExpired => return Err(self.reject_session(stale, "refresh token expired").await),
    };

    let tokens: RefreshResponse = match serde_json::from_value(data) {
      Ok(tokens) => tokens,
      Err(e) => {
        return Err(
          self
            .reject_session(stale, &format!("malformed refresh response: {}", e))
            .await,
        )
      }
    };

    let session = AuthSession::new(tokens.access_token, tokens.refresh_token);
    tracing::info!(
      old = %stale.identity(),
      new = %session.identity(),
      "refreshed access token"
    );
    self.sessions.replace_after_refresh(session.clone()).await;
    Ok(session)
  }

  async fn reject_session(&self, stale: &AuthSession, reason: &str) -> SyncError {
    tracing::warn!(session = %stale.identity(), reason, "token refresh failed, signing out");
    if let Err(e) = self.sessions.sign_out().await {
      tracing::warn!(error = %e, "failed to clear session after refresh failure");
    }
    SyncError::Unauthenticated
  }

  fn log_failure(&self, request: &HttpRequest, error: SyncError) -> SyncError {
    match &error {
      SyncError::Decode(detail) => tracing::error!(
        method = request.method.as_str(),
        path = %request.path,
        detail = %detail,
        "undecodable response, client and server may disagree on the schema"
      ),
      SyncError::NetworkUnavailable(detail) => tracing::debug!(
        method = request.method.as_str(),
        path = %request.path,
        detail = %detail,
        "network unavailable"
      ),
      other => tracing::info!(
        method = request.method.as_str(),
        path = %request.path,
        error = %other,
        "request failed"
      ),
    }
    error
  }
}

fn transport_failure(e: TransportError) -> SyncError {
  SyncError::NetworkUnavailable(e.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::Store;
  use crate::test_support::FakeBackend;
  use std::time::Duration;

  async fn setup(backend: &Arc<FakeBackend>) -> Arc<Executor> {
    let sessions = SessionStore::open(Store::memory("session")).await;
    sessions.sign_in(backend.issue_session()).await.unwrap();
    Arc::new(Executor::new(backend.clone(), Arc::new(sessions)))
  }

  #[tokio::test]
  async fn test_success_injects_bearer() {
    let backend = Arc::new(FakeBackend::new());
    backend.put_resource("entries/2025-06-01", json!({ "mood": 4 }));
    let executor = setup(&backend).await;

    let data = executor
      .execute(&HttpRequest::get("entries/2025-06-01"))
      .await
      .unwrap();
    assert_eq!(data["mood"], 4);

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].bearer.as_deref(), Some(backend.valid_access().as_str()));
  }

  #[tokio::test]
  async fn test_expired_token_refreshes_once_and_retries() {
    let backend = Arc::new(FakeBackend::new());
    let executor = setup(&backend).await;
    backend.expire_access();

    executor
      .execute(&HttpRequest::get("entries/2025-06-01"))
      .await
      .unwrap();

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.calls().len(), 3);
    let current = executor.sessions().current().await.unwrap();
    assert_eq!(current.access_token, backend.valid_access());
  }

  #[tokio::test]
  async fn test_embedded_expiry_is_detected() {
    let backend = Arc::new(FakeBackend::new());
    backend.use_embedded_expiry(true);
    let executor = setup(&backend).await;
    backend.expire_access();

    executor
      .execute(&HttpRequest::get("plans/2025-06-01"))
      .await
      .unwrap();
    assert_eq!(backend.refresh_calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_expiry_refreshes_exactly_once() {
    let backend = Arc::new(FakeBackend::new().with_latency(Duration::from_millis(20)));
    let executor = setup(&backend).await;
    backend.expire_access();

    let tasks: Vec<_> = (0..10)
      .map(|i| {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
          executor
            .execute(&HttpRequest::get(format!("entries/2025-06-{:02}", i + 1)))
            .await
        })
      })
      .collect();

    for task in tasks {
      task.await.unwrap().unwrap();
    }
    assert_eq!(backend.refresh_calls(), 1);
  }

  #[tokio::test]
  async fn test_second_expiry_is_terminal() {
    let backend = Arc::new(FakeBackend::new());
    backend.always_reject_access(true);
    let executor = setup(&backend).await;

    let err = executor
      .execute(&HttpRequest::get("entries/2025-06-01"))
      .await
      .unwrap_err();
    assert_eq!(err, SyncError::Unauthenticated);
    assert_eq!(backend.refresh_calls(), 1);
    // initial + refresh + one retry
    assert_eq!(backend.calls().len(), 3);
  }

  #[tokio::test]
  async fn test_rejected_refresh_signs_out() {
    let backend = Arc::new(FakeBackend::new());
    let executor = setup(&backend).await;
    backend.expire_access();
    backend.reject_refresh(true);

    let err = executor
      .execute(&HttpRequest::get("entries/2025-06-01"))
      .await
      .unwrap_err();
    assert_eq!(err, SyncError::Unauthenticated);
    assert!(!executor.sessions().is_signed_in().await);

    // No session, no network
    let before = backend.calls().len();
    let err = executor
      .execute(&HttpRequest::get("entries/2025-06-01"))
      .await
      .unwrap_err();
    assert_eq!(err, SyncError::Unauthenticated);
    assert_eq!(backend.calls().len(), before);
  }

  #[tokio::test]
  async fn test_offline_is_network_unavailable() {
    let backend = Arc::new(FakeBackend::new());
    let executor = setup(&backend).await;
    backend.set_online(false);

    let err = executor
      .execute(&HttpRequest::get("entries/2025-06-01"))
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::NetworkUnavailable(_)));
    assert!(executor.sessions().is_signed_in().await);
  }

  #[tokio::test]
  async fn test_typed_decode_failure_is_decode_error() {
    let backend = Arc::new(FakeBackend::new());
    backend.put_resource("entries/2025-06-01", json!("not an object"));
    let executor = setup(&backend).await;

    #[derive(Debug, Deserialize)]
    struct Entry {
      #[allow(dead_code)]
      mood: u8,
    }

    let err = executor
      .execute_json::<Entry>(&HttpRequest::get("entries/2025-06-01"))
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Decode(_)));
  }
}
