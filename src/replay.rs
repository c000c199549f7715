//! Drains the write queue through the executor with capped exponential backoff.
//!
//! Replay runs when something external happens (pull-to-refresh, reconnect,
//! app foreground), never on a timer. Operations on the same target replay
//! strictly in queue order; different targets replay concurrently.

use chrono::Duration;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::error::SyncError;
use crate::executor::Executor;
use crate::queue::{PendingOperation, WriteQueue};
use crate::transport::HttpRequest;

/// Maps a queued operation to the request that applies it remotely.
pub type Router = fn(&PendingOperation) -> HttpRequest;

/// Capped exponential backoff keyed by attempt count.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
  pub base: Duration,
  pub max: Duration,
}

impl Default for Backoff {
  fn default() -> Self {
    Self {
      base: Duration::seconds(5),
      max: Duration::minutes(15),
    }
  }
}

impl Backoff {
  pub fn new(base: Duration, max: Duration) -> Self {
    Self { base, max }
  }

  /// `min(base * 2^attempts, max)`, never overflowing.
  pub fn delay(&self, attempt_count: u32) -> Duration {
    let factor = 1i64.checked_shl(attempt_count.min(62)).unwrap_or(i64::MAX);
    let millis = self
      .base
      .num_milliseconds()
      .saturating_mul(factor)
      .min(self.max.num_milliseconds());
    Duration::milliseconds(millis)
  }

  /// Whether `op`'s backoff window has elapsed. Never-attempted operations are always due.
  pub fn is_due(&self, op: &PendingOperation, now: chrono::DateTime<chrono::Utc>) -> bool {
    match op.last_attempt_at {
      None => true,
      Some(last) => now - last >= self.delay(op.attempt_count),
    }
  }
}

/// What one replay pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: usize,
  /// Left for a later pass: backoff not elapsed, or behind a failure on the same target
  pub deferred: usize,
  /// Another replay was already running
  pub skipped_busy: bool,
  /// The session is gone; the user must sign in again
  pub unauthenticated: bool,
}

impl ReplayReport {
  fn merge(&mut self, other: ReplayReport) {
    self.attempted += other.attempted;
    self.succeeded += other.succeeded;
    self.failed += other.failed;
    self.deferred += other.deferred;
    self.unauthenticated |= other.unauthenticated;
  }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for RunningGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

pub struct ReplayEngine {
  executor: Arc<Executor>,
  queue: Arc<WriteQueue>,
  clock: SharedClock,
  backoff: Backoff,
  router: Router,
  running: AtomicBool,
}

impl ReplayEngine {
  pub fn new(
    executor: Arc<Executor>,
    queue: Arc<WriteQueue>,
    clock: SharedClock,
    backoff: Backoff,
    router: Router,
  ) -> Self {
    Self {
      executor,
      queue,
      clock,
      backoff,
      router,
      running: AtomicBool::new(false),
    }
  }

  pub fn backoff(&self) -> Backoff {
    self.backoff
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  /// Run one pass over the queue. A call made while a pass is running returns
  /// immediately with `skipped_busy` set.
  pub async fn replay(&self) -> ReplayReport {
    let Some(_guard) = RunningGuard::acquire(&self.running) else {
      tracing::debug!("replay already running, skipping");
      return ReplayReport {
        skipped_busy: true,
        ..Default::default()
      };
    };

    let ops = self.queue.list().await;
    if ops.is_empty() {
      return ReplayReport::default();
    }

    let groups = group_by_target(ops);
    tracing::info!(targets = groups.len(), "replaying pending operations");

    let abort = AtomicBool::new(false);
    let results = join_all(groups.into_iter().map(|ops| self.replay_target(ops, &abort))).await;

    let mut report = ReplayReport::default();
    for result in results {
      report.merge(result);
    }

    tracing::info!(
      attempted = report.attempted,
      succeeded = report.succeeded,
      failed = report.failed,
      deferred = report.deferred,
      "replay finished"
    );
    report
  }

  /// Replay one target's operations in order, stopping at the first one that
  /// is not due or fails so nothing overtakes it.
  async fn replay_target(&self, ops: Vec<PendingOperation>, abort: &AtomicBool) -> ReplayReport {
    let mut report = ReplayReport::default();
    let mut remaining = ops.into_iter();

    while let Some(mut op) = remaining.next() {
      if abort.load(Ordering::Acquire) || !self.backoff.is_due(&op, self.clock.now()) {
        report.deferred += 1 + remaining.len();
        break;
      }

      report.attempted += 1;
      let request = (self.router)(&op);
      let result = self.executor.execute(&request).await;
      op.record_attempt(self.clock.now());

      match result {
        Ok(_) => {
          self.queue.remove(op.id).await;
          report.succeeded += 1;
          tracing::info!(op_id = %op.id, kind = %op.kind, target = %op.target, "replayed operation");
        }
        Err(e) => {
          self.queue.update(&op).await;
          report.failed += 1;
          report.deferred += remaining.len();

          if e == SyncError::Unauthenticated {
            abort.store(true, Ordering::Release);
            report.unauthenticated = true;
          }

          tracing::warn!(
            op_id = %op.id,
            kind = %op.kind,
            target = %op.target,
            attempt = op.attempt_count,
            next_in_secs = self.backoff.delay(op.attempt_count).num_seconds(),
            error = %e,
            "replay failed, operation stays queued"
          );
          break;
        }
      }
    }

    report
  }
}

/// Split into per-target lists, keeping queue order inside each.
fn group_by_target(ops: Vec<PendingOperation>) -> Vec<Vec<PendingOperation>> {
  let mut index: HashMap<String, usize> = HashMap::new();
  let mut groups: Vec<Vec<PendingOperation>> = Vec::new();

  for op in ops {
    match index.get(&op.target) {
      Some(&i) => groups[i].push(op),
      None => {
        index.insert(op.target.clone(), groups.len());
        groups.push(vec![op]);
      }
    }
  }

  groups
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::SessionStore;
  use crate::clock::{Clock, ManualClock};
  use crate::queue::OperationKind;
  use crate::store::Store;
  use crate::test_support::FakeBackend;
  use crate::transport::HttpMethod;
  use chrono::{TimeZone, Utc};
  use serde_json::json;

  fn route(op: &PendingOperation) -> HttpRequest {
    let req = HttpRequest::new(HttpMethod::Put, format!("notes/{}", op.target));
    match &op.payload {
      Some(body) => req.with_body(body.clone()),
      None => req,
    }
  }

  struct Harness {
    backend: Arc<FakeBackend>,
    queue: Arc<WriteQueue>,
    clock: ManualClock,
    engine: Arc<ReplayEngine>,
  }

  async fn harness(backend: FakeBackend) -> Harness {
    let backend = Arc::new(backend);
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap());
    let sessions = SessionStore::open(Store::memory("session")).await;
    sessions.sign_in(backend.issue_session()).await.unwrap();
    let executor = Arc::new(Executor::new(backend.clone(), Arc::new(sessions)));
    let queue = Arc::new(WriteQueue::open(Store::memory("ops")).await);
    let engine = Arc::new(ReplayEngine::new(
      executor,
      queue.clone(),
      Arc::new(clock.clone()),
      Backoff::new(Duration::seconds(10), Duration::minutes(5)),
      route,
    ));
    Harness {
      backend,
      queue,
      clock,
      engine,
    }
  }

  impl Harness {
    async fn enqueue(&self, target: &str, seq: u32) -> PendingOperation {
      let op = PendingOperation::new(
        OperationKind::UpsertEntry,
        target,
        Some(json!({ "seq": seq })),
        self.clock.now(),
      );
      self.queue.enqueue(op.clone()).await;
      op
    }
  }

  #[test]
  fn test_backoff_is_monotonic_and_capped() {
    let backoff = Backoff::new(Duration::seconds(5), Duration::seconds(30));
    let delays: Vec<_> = (0..=3).map(|n| backoff.delay(n)).collect();
    assert_eq!(
      delays,
      vec![
        Duration::seconds(5),
        Duration::seconds(10),
        Duration::seconds(20),
        Duration::seconds(30)
      ]
    );
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(backoff.delay(u32::MAX), Duration::seconds(30));
  }

  #[tokio::test]
  async fn test_same_target_replays_in_queue_order() {
    let h = harness(FakeBackend::new()).await;
    h.enqueue("2025-06-01", 1).await;
    h.enqueue("2025-06-01", 2).await;

    let report = h.engine.replay().await;
    assert_eq!(report.succeeded, 2);
    assert_eq!(h.queue.count().await, 0);

    let seqs: Vec<_> = h
      .backend
      .resource_calls()
      .iter()
      .map(|c| c.body.as_ref().unwrap()["seq"].as_u64().unwrap())
      .collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(h.backend.resource("notes/2025-06-01"), Some(json!({ "seq": 2 })));
  }

  #[tokio::test]
  async fn test_failure_keeps_operation_and_backs_off() {
    let h = harness(FakeBackend::new()).await;
    let op = h.enqueue("2025-06-01", 1).await;
    h.backend.set_online(false);

    let report = h.engine.replay().await;
    assert_eq!(report.failed, 1);
    let stored = h.queue.get(op.id).await.unwrap();
    assert_eq!(stored.attempt_count, 1);
    assert_eq!(stored.last_attempt_at, Some(h.clock.now()));

    // Back online but still inside the backoff window
    h.backend.set_online(true);
    let report = h.engine.replay().await;
    assert_eq!(report.attempted, 0);
    assert_eq!(report.deferred, 1);
    assert!(h.backend.resource_calls().is_empty());

    h.clock.advance(h.engine.backoff().delay(1));
    let report = h.engine.replay().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.queue.count().await, 0);
  }

  #[tokio::test]
  async fn test_failure_blocks_later_ops_on_same_target_only() {
    let h = harness(FakeBackend::new()).await;
    h.backend.reject_path("notes/2025-06-01", 422);
    let first = h.enqueue("2025-06-01", 1).await;
    let second = h.enqueue("2025-06-01", 2).await;
    let other = h.enqueue("2025-06-02", 3).await;

    let report = h.engine.replay().await;
    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.deferred, 1);

    let left: Vec<_> = h.queue.list().await.iter().map(|o| o.id).collect();
    assert_eq!(left, vec![first.id, second.id]);
    assert!(h.queue.get(other.id).await.is_none());
    assert_eq!(h.queue.get(second.id).await.unwrap().attempt_count, 0);
  }

  #[tokio::test]
  async fn test_rejected_operations_are_never_dropped() {
    let h = harness(FakeBackend::new()).await;
    h.backend.reject_path("notes/2025-06-01", 400);
    let op = h.enqueue("2025-06-01", 1).await;

    for _ in 0..6 {
      h.engine.replay().await;
      h.clock.advance(Duration::hours(1));
    }

    let stored = h.queue.get(op.id).await.unwrap();
    assert_eq!(stored.attempt_count, 6);
    assert_eq!(h.queue.stuck(5).await.len(), 1);
  }

  #[tokio::test]
  async fn test_unauthenticated_aborts_pass() {
    let h = harness(FakeBackend::new()).await;
    h.backend.expire_access();
    h.backend.reject_refresh(true);
    h.enqueue("2025-06-01", 1).await;
    h.enqueue("2025-06-01", 2).await;

    let report = h.engine.replay().await;
    assert!(report.unauthenticated);
    assert_eq!(report.attempted, 1);
    assert_eq!(h.queue.count().await, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_replay_is_skipped() {
    let h = harness(FakeBackend::new().with_latency(std::time::Duration::from_millis(10))).await;
    h.enqueue("2025-06-01", 1).await;

    let first = {
      let engine = Arc::clone(&h.engine);
      tokio::spawn(async move { engine.replay().await })
    };
    // Let the first pass start and park on the network
    tokio::task::yield_now().await;
    assert!(h.engine.is_running());

    let second = h.engine.replay().await;
    assert!(second.skipped_busy);

    let first = first.await.unwrap();
    assert_eq!(first.succeeded, 1);
    assert_eq!(h.backend.resource_calls().len(), 1);
    assert!(!h.engine.is_running());
  }
}
