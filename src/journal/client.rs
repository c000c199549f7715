use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::AuthSession;
use crate::error::{Result, SyncError};
use crate::executor::Executor;
use crate::journal::api_types::{ApiEntry, ApiPlans, ApiTokenPair, SignInRequest};
use crate::journal::cache::JournalKey;
use crate::journal::types::{DayPlans, HabitStatus, JournalEntry};
use crate::queue::{OperationKind, PendingOperation};
use crate::transport::{path_segment, HttpMethod, HttpRequest};

/// Path of the credential sign-in endpoint, relative to the API base.
pub const SIGN_IN_PATH: &str = "auth/sign-in";

/// Journal API client over the authenticated executor
#[derive(Clone)]
pub struct JournalClient {
  executor: Arc<Executor>,
}

impl JournalClient {
  pub fn new(executor: Arc<Executor>) -> Self {
    Self { executor }
  }

  pub fn executor(&self) -> &Arc<Executor> {
    &self.executor
  }

  /// Exchange credentials for a session and persist it.
  pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
    let body = encode(&SignInRequest { email, password })?;
    let request = HttpRequest::new(HttpMethod::Post, SIGN_IN_PATH).with_body(body);

    let data = self.executor.execute_anonymous(&request).await?;
    let tokens: ApiTokenPair = serde_json::from_value(data)
      .map_err(|e| SyncError::Decode(format!("malformed sign-in response: {}", e)))?;

    let session = AuthSession::new(tokens.access_token, tokens.refresh_token);
    self.executor.sessions().sign_in(session.clone()).await?;
    tracing::info!(session = %session.identity(), "signed in");
    Ok(session)
  }

  /// Entry for a day, `None` if nothing was written.
  pub async fn get_entry(&self, date: NaiveDate) -> Result<Option<JournalEntry>> {
    let entry: Option<ApiEntry> = self
      .executor
      .execute_json(&HttpRequest::get(format!("entries/{}", day(date))))
      .await?;
    Ok(entry.map(ApiEntry::into_entry))
  }

  pub async fn get_plans(&self, date: NaiveDate) -> Result<Option<DayPlans>> {
    let plans: Option<ApiPlans> = self
      .executor
      .execute_json(&HttpRequest::get(format!("plans/{}", day(date))))
      .await?;
    Ok(plans.map(ApiPlans::into_plans))
  }

  pub async fn get_habit(&self, date: NaiveDate, habit_id: &str) -> Result<HabitStatus> {
    let status: Option<HabitStatus> = self
      .executor
      .execute_json(&HttpRequest::get(format!(
        "habits/{}/{}",
        day(date),
        path_segment(habit_id)
      )))
      .await?;
    Ok(status.unwrap_or_default())
  }

  /// Apply a mutation in the same shape it would be queued in.
  ///
  /// This is the only write path: `payload` is the body the caller would
  /// also enqueue, so it is built once per write.
  pub async fn mutate(
    &self,
    kind: OperationKind,
    date: NaiveDate,
    payload: Option<Value>,
  ) -> Result<()> {
    let request = mutation_request(kind, &day(date), payload);
    self.executor.execute(&request).await.map(|_| ())
  }
}

/// The request that applies `kind` to `target`.
///
/// Immediate writes and replayed operations both go through here, so a
/// queued operation always hits the same endpoint it originally would have.
pub fn mutation_request(kind: OperationKind, target: &str, payload: Option<Value>) -> HttpRequest {
  let (method, path) = kind.request_line(target);

  let request = HttpRequest::new(method, path);
  match payload {
    Some(body) => request.with_body(body),
    None => request,
  }
}

/// Replay router for journal operations.
pub fn route(op: &PendingOperation) -> HttpRequest {
  mutation_request(op.kind, &op.target, op.payload.clone())
}

pub(crate) fn encode<T: Serialize>(body: &T) -> Result<Value> {
  serde_json::to_value(body)
    .map_err(|e| SyncError::Decode(format!("could not encode request body: {}", e)))
}

fn day(date: NaiveDate) -> String {
  JournalKey::Date(date).to_string()
}
