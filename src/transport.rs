//! HTTP transport seam between the executor and the network.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
  Get,
  Post,
  Put,
  Delete,
}

impl HttpMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Delete => "DELETE",
    }
  }
}

// Everything that would end or split a path segment
const SEGMENT: &AsciiSet = &CONTROLS
  .add(b' ')
  .add(b'"')
  .add(b'#')
  .add(b'%')
  .add(b'/')
  .add(b'<')
  .add(b'>')
  .add(b'?')
  .add(b'[')
  .add(b'\\')
  .add(b']')
  .add(b'^')
  .add(b'`')
  .add(b'{')
  .add(b'|')
  .add(b'}');

/// Percent-encode caller-supplied text so it stays a single path segment.
pub fn path_segment(raw: &str) -> String {
  utf8_percent_encode(raw, SEGMENT).to_string()
}

/// One logical request, relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
  pub method: HttpMethod,
  pub path: String,
  pub body: Option<serde_json::Value>,
  /// Set by the executor, never by callers
  pub bearer: Option<String>,
}

impl HttpRequest {
  pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      body: None,
      bearer: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(HttpMethod::Get, path)
  }

  pub fn with_body(mut self, body: serde_json::Value) -> Self {
    self.body = Some(body);
    self
  }

  pub(crate) fn with_bearer(&self, token: &str) -> Self {
    Self {
      bearer: Some(token.to_string()),
      ..self.clone()
    }
  }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Failures below the HTTP layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  #[error("host unreachable: {0}")]
  Unreachable(String),
  #[error("request timed out")]
  Timeout,
  #[error("transport error: {0}")]
  Other(String),
}

/// Sends requests to the remote API.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl ReqwestTransport {
  pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
    // Without a trailing slash `join` would drop the last path segment
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url = Url::parse(&normalized)
      .map_err(|e| TransportError::Other(format!("Invalid API base URL {}: {}", base_url, e)))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(user_agent)
      .build()
      .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  fn url_for(&self, path: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| TransportError::Other(format!("Invalid request path {}: {}", path, e)))
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let url = self.url_for(&request.path)?;
    let method = match request.method {
      HttpMethod::Get => reqwest::Method::GET,
      HttpMethod::Post => reqwest::Method::POST,
      HttpMethod::Put => reqwest::Method::PUT,
      HttpMethod::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self
      .client
      .request(method, url)
      .header(reqwest::header::ACCEPT, "application/json");
    if let Some(token) = &request.bearer {
      builder = builder.bearer_auth(token);
    }
    if let Some(body) = &request.body {
      let bytes = serde_json::to_vec(body)
        .map_err(|e| TransportError::Other(format!("Failed to encode body: {}", e)))?;
      builder = builder
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(bytes);
    }

    let response = builder.send().await.map_err(classify)?;
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(classify)?.to_vec();

    Ok(HttpResponse { status, body })
  }
}

fn classify(e: reqwest::Error) -> TransportError {
  if e.is_timeout() {
    TransportError::Timeout
  } else if e.is_connect() || e.is_request() {
    TransportError::Unreachable(e.to_string())
  } else {
    TransportError::Other(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_paths_join_under_base_path() {
    let transport =
      ReqwestTransport::new("https://api.example.com/v1", Duration::from_secs(5), "test").unwrap();
    assert_eq!(
      transport.url_for("/entries/2025-06-01").unwrap().as_str(),
      "https://api.example.com/v1/entries/2025-06-01"
    );
  }

  #[test]
  fn test_segment_cannot_escape_its_path() {
    assert_eq!(path_segment("read-20min"), "read-20min");
    assert_eq!(path_segment("a/b?c#d e"), "a%2Fb%3Fc%23d%20e");

    let transport =
      ReqwestTransport::new("https://api.example.com/v1", Duration::from_secs(5), "test").unwrap();
    let path = format!("habits/2025-06-01/{}", path_segment("../admin?x=1"));
    assert_eq!(
      transport.url_for(&path).unwrap().as_str(),
      "https://api.example.com/v1/habits/2025-06-01/..%2Fadmin%3Fx=1"
    );
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    assert!(ReqwestTransport::new("not a url", Duration::from_secs(5), "test").is_err());
  }
}
