//! Durable FIFO queue of mutations that could not be delivered.
//!
//! Operations leave the queue only when the remote confirms them, or when
//! `discard` is called explicitly. Order is insertion order and survives
//! restarts, since two edits to the same date must replay in the order made.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::Store;
use crate::transport::HttpMethod;

/// The mutation a pending operation stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  UpsertEntry,
  DeleteEntry,
  UpsertPlans,
  DeletePlans,
  SubmitMorningRitual,
  SubmitEveningReflection,
  ToggleHabit,
}

impl OperationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::UpsertEntry => "upsert_entry",
      Self::DeleteEntry => "delete_entry",
      Self::UpsertPlans => "upsert_plans",
      Self::DeletePlans => "delete_plans",
      Self::SubmitMorningRitual => "submit_morning_ritual",
      Self::SubmitEveningReflection => "submit_evening_reflection",
      Self::ToggleHabit => "toggle_habit",
    }
  }

  /// Method and API path this kind applies to `target`.
  pub fn request_line(&self, target: &str) -> (HttpMethod, String) {
    match self {
      Self::UpsertEntry => (HttpMethod::Put, format!("entries/{}", target)),
      Self::DeleteEntry => (HttpMethod::Delete, format!("entries/{}", target)),
      Self::UpsertPlans => (HttpMethod::Put, format!("plans/{}", target)),
      Self::DeletePlans => (HttpMethod::Delete, format!("plans/{}", target)),
      Self::SubmitMorningRitual => (HttpMethod::Post, format!("rituals/morning/{}", target)),
      Self::SubmitEveningReflection => (HttpMethod::Post, format!("rituals/evening/{}", target)),
      Self::ToggleHabit => (HttpMethod::Post, format!("habits/{}", target)),
    }
  }
}

impl std::fmt::Display for OperationKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.pad(self.as_str())
  }
}

/// A mutation waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
  pub id: Uuid,
  pub kind: OperationKind,
  /// Logical key, usually a `YYYY-MM-DD` date
  pub target: String,
  /// Request body as it would have been sent
  pub payload: Option<serde_json::Value>,
  #[serde(default)]
  pub attempt_count: u32,
  #[serde(default)]
  pub last_attempt_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub created_at: DateTime<Utc>,
}

impl PendingOperation {
  pub fn new(
    kind: OperationKind,
    target: impl Into<String>,
    payload: Option<serde_json::Value>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      kind,
      target: target.into(),
      payload,
      attempt_count: 0,
      last_attempt_at: None,
      created_at: now,
    }
  }

  /// Record a replay attempt.
  pub fn record_attempt(&mut self, now: DateTime<Utc>) {
    self.attempt_count = self.attempt_count.saturating_add(1);
    self.last_attempt_at = Some(now);
  }
}

/// Persisted queue of pending operations.
pub struct WriteQueue {
  store: Store,
  ops: RwLock<Vec<PendingOperation>>,
}

impl WriteQueue {
  /// Load the queue from `store`.
  ///
  /// A corrupt file loads as an empty queue; a single undecodable operation
  /// is skipped without losing the rest.
  pub async fn open(store: Store) -> Self {
    let raw: Vec<serde_json::Value> = store.load().await;
    let total = raw.len();
    let loaded: Vec<PendingOperation> = raw
      .into_iter()
      .filter_map(|v| serde_json::from_value(v).ok())
      .collect();
    if loaded.len() < total {
      tracing::error!(
        store = %store.describe(),
        skipped = total - loaded.len(),
        "skipped undecodable pending operations"
      );
    }

    // Enforce id uniqueness on whatever was on disk, first one wins
    let mut seen = HashSet::new();
    let ops: Vec<_> = loaded.into_iter().filter(|op| seen.insert(op.id)).collect();

    if !ops.is_empty() {
      tracing::info!(pending = ops.len(), "loaded pending operations");
    }

    Self {
      store,
      ops: RwLock::new(ops),
    }
  }

  /// Append `op`. Returns false, leaving the queue untouched, if its id is already queued.
  pub async fn enqueue(&self, op: PendingOperation) -> bool {
    let mut ops = self.ops.write().await;
    if ops.iter().any(|o| o.id == op.id) {
      tracing::warn!(op_id = %op.id, "refusing to enqueue duplicate operation id");
      return false;
    }

    tracing::info!(op_id = %op.id, kind = %op.kind, target = %op.target, "queued operation for replay");
    ops.push(op);
    self.persist(&ops).await;
    true
  }

  /// Remove by id. Returns whether anything was removed.
  pub async fn remove(&self, id: Uuid) -> bool {
    let mut ops = self.ops.write().await;
    let before = ops.len();
    ops.retain(|o| o.id != id);
    let removed = ops.len() != before;
    if removed {
      self.persist(&ops).await;
    }
    removed
  }

  /// Replace the stored operation with the same id, keeping its position.
  pub async fn update(&self, op: &PendingOperation) -> bool {
    let mut ops = self.ops.write().await;
    match ops.iter_mut().find(|o| o.id == op.id) {
      Some(slot) => {
        *slot = op.clone();
        self.persist(&ops).await;
        true
      }
      None => false,
    }
  }

  /// All pending operations in insertion order.
  pub async fn list(&self) -> Vec<PendingOperation> {
    self.ops.read().await.clone()
  }

  pub async fn get(&self, id: Uuid) -> Option<PendingOperation> {
    self.ops.read().await.iter().find(|o| o.id == id).cloned()
  }

  pub async fn count(&self) -> usize {
    self.ops.read().await.len()
  }

  /// Whether anything is still waiting for `target`.
  pub async fn has_pending(&self, target: &str) -> bool {
    self.ops.read().await.iter().any(|o| o.target == target)
  }

  /// Every target with at least one queued operation.
  pub async fn pending_targets(&self) -> HashSet<String> {
    self.ops.read().await.iter().map(|o| o.target.clone()).collect()
  }

  /// Drop an operation without delivering it. Only for explicit user or
  /// policy decisions; replay never calls this.
  pub async fn discard(&self, id: Uuid) -> Option<PendingOperation> {
    let mut ops = self.ops.write().await;
    let pos = ops.iter().position(|o| o.id == id)?;
    let op = ops.remove(pos);
    tracing::warn!(
      op_id = %op.id,
      kind = %op.kind,
      target = %op.target,
      attempts = op.attempt_count,
      "discarded pending operation"
    );
    self.persist(&ops).await;
    Some(op)
  }

  /// Operations that have failed at least `threshold` times. They stay queued.
  pub async fn stuck(&self, threshold: u32) -> Vec<PendingOperation> {
    self
      .ops
      .read()
      .await
      .iter()
      .filter(|o| o.attempt_count >= threshold)
      .cloned()
      .collect()
  }

  async fn persist(&self, ops: &[PendingOperation]) {
    if let Err(e) = self.store.save(&ops).await {
      tracing::error!(store = %self.store.describe(), error = %e, "failed to persist pending operations");
    }
  }
}
