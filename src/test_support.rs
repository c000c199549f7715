//! In-process stand-in for the remote API, used by unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::auth::AuthSession;
use crate::executor::REFRESH_PATH;
use crate::journal::SIGN_IN_PATH;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};

#[derive(Default)]
struct State {
  generation: u32,
  access_expired: bool,
  always_reject_access: bool,
  embedded_expiry: bool,
  reject_refresh: bool,
  offline: bool,
  refresh_calls: usize,
  calls: Vec<HttpRequest>,
  resources: HashMap<String, Value>,
  rejected_paths: HashMap<String, u16>,
}

/// Fake backend with rotating tokens and a path-keyed resource store.
///
/// GET returns what was stored at the path (or `null`), PUT/POST store the
/// body, DELETE removes it.
pub(crate) struct FakeBackend {
  state: Mutex<State>,
  latency: Duration,
}

impl FakeBackend {
  /// The only password sign-in accepts
  pub(crate) const PASSWORD: &'static str = "correct horse";

  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(State {
        generation: 1,
        ..Default::default()
      }),
      latency: Duration::ZERO,
    }
  }

  pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  fn state(&self) -> std::sync::MutexGuard<'_, State> {
    self.state.lock().unwrap()
  }

  /// Tokens the backend currently accepts.
  pub(crate) fn issue_session(&self) -> AuthSession {
    let gen = self.state().generation;
    AuthSession::new(format!("access-{}", gen), format!("refresh-{}", gen))
  }

  pub(crate) fn valid_access(&self) -> String {
    format!("access-{}", self.state().generation)
  }

  pub(crate) fn expire_access(&self) {
    self.state().access_expired = true;
  }

  pub(crate) fn always_reject_access(&self, on: bool) {
    self.state().always_reject_access = on;
  }

  pub(crate) fn use_embedded_expiry(&self, on: bool) {
    self.state().embedded_expiry = on;
  }

  pub(crate) fn reject_refresh(&self, on: bool) {
    self.state().reject_refresh = on;
  }

  pub(crate) fn set_online(&self, online: bool) {
    self.state().offline = !online;
  }

  pub(crate) fn reject_path(&self, path: &str, status: u16) {
    self.state().rejected_paths.insert(path.to_string(), status);
  }

  pub(crate) fn put_resource(&self, path: &str, value: Value) {
    self.state().resources.insert(path.to_string(), value);
  }

  pub(crate) fn resource(&self, path: &str) -> Option<Value> {
    self.state().resources.get(path).cloned()
  }

  pub(crate) fn refresh_calls(&self) -> usize {
    self.state().refresh_calls
  }

  /// Every request that reached the backend, refreshes included.
  pub(crate) fn calls(&self) -> Vec<HttpRequest> {
    self.state().calls.clone()
  }

  /// Requests other than refresh and sign-in.
  pub(crate) fn resource_calls(&self) -> Vec<HttpRequest> {
    self
      .calls()
      .into_iter()
      .filter(|c| c.path != REFRESH_PATH && c.path != SIGN_IN_PATH)
      .collect()
  }

  fn respond(&self, request: &HttpRequest) -> HttpResponse {
    let mut state = self.state();
    state.calls.push(request.clone());

    if request.path == REFRESH_PATH {
      state.refresh_calls += 1;
      let presented = request
        .body
        .as_ref()
        .and_then(|b| b["refreshToken"].as_str())
        .unwrap_or_default()
        .to_string();
      if state.reject_refresh || presented != format!("refresh-{}", state.generation) {
        return reply(401, json!({ "success": false, "data": null, "error": { "code": "INVALID_REFRESH" } }));
      }
      state.generation += 1;
      state.access_expired = false;
      let gen = state.generation;
      return ok(json!({
        "accessToken": format!("access-{}", gen),
        "refreshToken": format!("refresh-{}", gen),
      }));
    }

    if request.path == SIGN_IN_PATH {
      let password = request
        .body
        .as_ref()
        .and_then(|b| b["password"].as_str())
        .unwrap_or_default();
      if password != Self::PASSWORD {
        return reply(401, json!({ "success": false, "data": null, "error": { "code": "INVALID_CREDENTIALS" } }));
      }
      let gen = state.generation;
      return ok(json!({
        "accessToken": format!("access-{}", gen),
        "refreshToken": format!("refresh-{}", gen),
      }));
    }

    let expected = format!("access-{}", state.generation);
    let authorized = !state.always_reject_access
      && !state.access_expired
      && request.bearer.as_deref() == Some(expected.as_str());
    if !authorized {
      return if state.embedded_expiry {
        reply(
          200,
          json!({ "success": false, "data": null, "error": { "code": "TOKEN_EXPIRED", "message": "Access token expired" } }),
        )
      } else {
        reply(401, json!({ "success": false, "data": null, "error": { "message": "unauthorized" } }))
      };
    }

    if let Some(status) = state.rejected_paths.get(&request.path).copied() {
      return reply(
        status,
        json!({ "success": false, "data": null, "error": { "code": "VALIDATION", "message": "rejected" } }),
      );
    }

    match request.method {
      HttpMethod::Get => ok(state.resources.get(&request.path).cloned().unwrap_or(Value::Null)),
      HttpMethod::Put | HttpMethod::Post => {
        let body = request.body.clone().unwrap_or(Value::Null);
        state.resources.insert(request.path.clone(), body.clone());
        ok(body)
      }
      HttpMethod::Delete => {
        state.resources.remove(&request.path);
        ok(Value::Null)
      }
    }
  }
}

fn ok(data: Value) -> HttpResponse {
  reply(200, json!({ "success": true, "data": data, "error": null }))
}

fn reply(status: u16, body: Value) -> HttpResponse {
  HttpResponse {
    status,
    body: serde_json::to_vec(&body).unwrap(),
  }
}

#[async_trait]
impl Transport for FakeBackend {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
    if self.state().offline {
      return Err(TransportError::Unreachable("connection refused".to_string()));
    }
    Ok(self.respond(request))
  }
}
