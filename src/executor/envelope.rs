//! Response envelope shared by every endpoint, and outcome classification.
//!
//! The backend wraps everything as `{ success, data, error }`, and sometimes
//! reports business errors (including an expired token) through a 200.

use serde::Deserialize;
use serde_json::Value;

use crate::error::SyncError;
use crate::transport::HttpResponse;

/// `{ success, data, error }`
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
  pub success: bool,
  pub data: Option<T>,
  #[serde(default)]
  pub error: Option<ApiError>,
}

/// The `error` member: either `{ code, message }` or a bare string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiError {
  Detailed {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
  },
  Message(String),
}

const AUTH_EXPIRED_CODES: &[&str] = &["TOKEN_EXPIRED", "JWT_EXPIRED", "INVALID_TOKEN", "UNAUTHORIZED"];
const AUTH_EXPIRED_PHRASES: &[&str] = &["token expired", "token has expired", "jwt expired"];

impl ApiError {
  pub fn code(&self) -> Option<&str> {
    match self {
      Self::Detailed { code, .. } => code.as_deref(),
      Self::Message(_) => None,
    }
  }

  pub fn message(&self) -> String {
    match self {
      Self::Detailed { code, message } => message
        .clone()
        .or_else(|| code.clone())
        .unwrap_or_else(|| "unknown error".to_string()),
      Self::Message(m) => m.clone(),
    }
  }

  /// Whether this error means "your access token is no longer valid".
  pub fn is_auth_expired(&self) -> bool {
    if let Some(code) = self.code() {
      if AUTH_EXPIRED_CODES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(code.trim()))
      {
        return true;
      }
    }
    let message = self.message().to_lowercase();
    AUTH_EXPIRED_PHRASES.iter().any(|p| message.contains(p))
  }
}

/// What a single HTTP exchange amounted to.
#[derive(Debug)]
pub(crate) enum Outcome {
  Success(Value),
  AuthExpired,
  Failure(SyncError),
}

/// Classify a response. 401 and an embedded expired-token error are the same signal.
pub(crate) fn classify(response: &HttpResponse) -> Outcome {
  let status = response.status;

  if status == 401 {
    return Outcome::AuthExpired;
  }

  if status == 408 || status == 429 || status >= 500 {
    return Outcome::Failure(SyncError::NetworkUnavailable(format!(
      "server returned {}",
      status
    )));
  }

  let envelope = if response.body.iter().all(u8::is_ascii_whitespace) {
    None
  } else {
    Some(serde_json::from_slice::<ApiEnvelope<Value>>(&response.body))
  };

  if !response.is_success() {
    let error = envelope.and_then(|e| e.ok()).and_then(|e| e.error);
    return match error {
      Some(error) if error.is_auth_expired() => Outcome::AuthExpired,
      Some(error) => Outcome::Failure(SyncError::ServerRejected {
        status,
        message: error.message(),
      }),
      None => Outcome::Failure(SyncError::ServerRejected {
        status,
        message: format!("HTTP {}", status),
      }),
    };
  }

  match envelope {
    // 204 and friends
    None => Outcome::Success(Value::Null),
    Some(Err(e)) => Outcome::Failure(SyncError::Decode(e.to_string())),
    Some(Ok(envelope)) if envelope.success => {
      Outcome::Success(envelope.data.unwrap_or(Value::Null))
    }
    Some(Ok(envelope)) => match envelope.error {
      Some(error) if error.is_auth_expired() => Outcome::AuthExpired,
      Some(error) => Outcome::Failure(SyncError::ServerRejected {
        status,
        message: error.message(),
      }),
      None => Outcome::Failure(SyncError::ServerRejected {
        status,
        message: "request failed without an error body".to_string(),
      }),
    },
  }
}
