//! Cached journal client that wraps JournalClient with offline-first behavior.
//!
//! Reads go cache-first and always resolve. Writes update the cache right
//! away, try the network once, and land in the write queue if the network is
//! not there.

use chrono::{Duration, NaiveDate};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{AuthSession, SessionStore};
use crate::cache::{CacheLayer, CacheResult, Cacheable, FreshnessPolicy, TtlCache};
use crate::clock::SharedClock;
use crate::error::{Result, SyncError};
use crate::executor::Executor;
use crate::queue::{OperationKind, PendingOperation, WriteQueue};
use crate::replay::{Backoff, ReplayEngine, ReplayReport};
use crate::store::{DataDir, Store};
use crate::transport::Transport;

use super::api_types::{
  EveningReflectionRequest, HabitToggleRequest, MorningRitualRequest, UpsertEntryRequest,
  UpsertPlansRequest,
};
use super::cache::{day_of, JournalKey, PendingDays};
use super::client::{encode, route, JournalClient};
use super::types::{
  DayPlans, EveningReflection, HabitStatus, HabitToggle, JournalEntry, MorningRitual,
};

/// Timing knobs for the sync layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncSettings {
  pub freshness: FreshnessPolicy,
  pub backoff: Backoff,
}

/// One store per persisted concern.
pub struct Stores {
  pub entries: Store,
  pub plans: Store,
  pub habits: Store,
  pub pending: Store,
  pub session: Store,
}

impl Stores {
  pub fn on_disk(dir: &DataDir) -> Self {
    Self {
      entries: Store::file(dir.cache_file(<Option<JournalEntry>>::namespace())),
      plans: Store::file(dir.cache_file(<Option<DayPlans>>::namespace())),
      habits: Store::file(dir.cache_file(HabitStatus::namespace())),
      pending: Store::file(dir.pending_ops_file()),
      session: Store::file(dir.session_file()),
    }
  }

  pub fn in_memory() -> Self {
    Self {
      entries: Store::memory("entries"),
      plans: Store::memory("plans"),
      habits: Store::memory("habits"),
      pending: Store::memory("pending_ops"),
      session: Store::memory("session"),
    }
  }
}

/// What happened to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
  /// The server confirmed it
  Applied,
  /// Stored for replay; the local copy already reflects it
  Queued,
}

/// Journal client with transparent caching and offline writes.
///
/// This is the one context object an application holds. Everything it
/// touches is owned here, so tests can build as many isolated instances as
/// they like.
#[derive(Clone)]
pub struct CachedJournalClient {
  inner: JournalClient,
  entries: CacheLayer<Option<JournalEntry>>,
  plans: CacheLayer<Option<DayPlans>>,
  habits: CacheLayer<HabitStatus>,
  queue: Arc<WriteQueue>,
  replay: Arc<ReplayEngine>,
  clock: SharedClock,
}

impl CachedJournalClient {
  /// Load all persisted state and wire the components together.
  pub async fn open(
    stores: Stores,
    transport: Arc<dyn Transport>,
    clock: SharedClock,
    settings: SyncSettings,
  ) -> Self {
    let sessions = Arc::new(SessionStore::open(stores.session).await);
    let executor = Arc::new(Executor::new(transport, sessions));
    let queue = Arc::new(WriteQueue::open(stores.pending).await);
    let replay = Arc::new(ReplayEngine::new(
      Arc::clone(&executor),
      Arc::clone(&queue),
      Arc::clone(&clock),
      settings.backoff,
      route,
    ));

    // Queued writes pin their day, so reads never replace the optimistic copy
    let pins = Arc::new(PendingDays(Arc::clone(&queue)));
    let entries = CacheLayer::new(
      TtlCache::open(stores.entries, Arc::clone(&clock)).await,
      Arc::clone(&clock),
    )
    .with_policy(settings.freshness)
    .with_pins(pins.clone());
    let plans = CacheLayer::new(
      TtlCache::open(stores.plans, Arc::clone(&clock)).await,
      Arc::clone(&clock),
    )
    .with_policy(settings.freshness)
    .with_pins(pins.clone());
    let habits = CacheLayer::new(
      TtlCache::open(stores.habits, Arc::clone(&clock)).await,
      Arc::clone(&clock),
    )
    .with_policy(settings.freshness)
    .with_pins(pins);

    Self {
      inner: JournalClient::new(executor),
      entries,
      plans,
      habits,
      queue,
      replay,
      clock,
    }
  }

  pub fn sessions(&self) -> &Arc<SessionStore> {
    self.inner.executor().sessions()
  }

  pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
    self.inner.sign_in(email, password).await
  }

  /// Forget the session. Cached data and queued writes stay for the next sign-in.
  pub async fn sign_out(&self) -> Result<()> {
    self.sessions().sign_out().await
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// Entry for a day with caching.
  pub async fn entry(&self, date: NaiveDate) -> Result<CacheResult<Option<JournalEntry>>> {
    let inner = self.inner.clone();
    self
      .entries
      .fetch(&JournalKey::Date(date).to_string(), move || async move {
        inner.get_entry(date).await
      })
      .await
  }

  /// Entry for a day straight from the network (pull-to-refresh).
  pub async fn refresh_entry(&self, date: NaiveDate) -> Result<CacheResult<Option<JournalEntry>>> {
    let inner = self.inner.clone();
    self
      .entries
      .refresh(&JournalKey::Date(date).to_string(), move || async move {
        inner.get_entry(date).await
      })
      .await
  }

  /// Plans for a day with caching.
  pub async fn plans(&self, date: NaiveDate) -> Result<CacheResult<Option<DayPlans>>> {
    let inner = self.inner.clone();
    self
      .plans
      .fetch(&JournalKey::Date(date).to_string(), move || async move {
        inner.get_plans(date).await
      })
      .await
  }

  /// Completion of one habit on one day with caching.
  pub async fn habit(&self, date: NaiveDate, habit_id: &str) -> Result<CacheResult<HabitStatus>> {
    let inner = self.inner.clone();
    let id = habit_id.to_string();
    self
      .habits
      .fetch(
        &JournalKey::DateWith(date, habit_id.to_string()).to_string(),
        move || async move { inner.get_habit(date, &id).await },
      )
      .await
  }

  /// Make sure entries for `dates` are cached, fetching only the stale ones.
  ///
  /// Days that cannot be fetched, or that still have queued writes, keep
  /// whatever was cached. Only a lost session fails the whole call.
  pub async fn hydrate_entries(
    &self,
    dates: &[NaiveDate],
  ) -> Result<BTreeMap<NaiveDate, Option<JournalEntry>>> {
    let dates: BTreeSet<NaiveDate> = dates.iter().copied().collect();
    let keys: Vec<String> = dates.iter().map(|d| JournalKey::Date(*d).to_string()).collect();

    let stale: HashSet<String> = self
      .entries
      .cache()
      .stale_keys(&keys, self.entries.policy().fresh_ttl)
      .await
      .into_iter()
      .collect();

    let pinned = self.queue.pending_targets().await;
    let to_fetch: Vec<NaiveDate> = dates
      .iter()
      .copied()
      .map(|d| (d, JournalKey::Date(d).to_string()))
      .filter(|(_, key)| stale.contains(key) && !pinned.contains(key))
      .map(|(d, _)| d)
      .collect();

    if !to_fetch.is_empty() {
      tracing::debug!(requested = dates.len(), stale = to_fetch.len(), "hydrating entries");
    }

    let fetched = join_all(
      to_fetch
        .iter()
        .map(|date| async move { (*date, self.inner.get_entry(*date).await) }),
    )
    .await;

    // A write may have been queued while the fetches were out
    let pinned = self.queue.pending_targets().await;
    let mut batch = Vec::with_capacity(fetched.len());
    for (date, result) in fetched {
      match result {
        Ok(entry) => {
          let key = JournalKey::Date(date).to_string();
          if !pinned.contains(&key) {
            batch.push((key, entry));
          }
        }
        Err(SyncError::Unauthenticated) => return Err(SyncError::Unauthenticated),
        Err(e) if e.is_fallback() => {
          tracing::debug!(date = %date, error = %e, "keeping cached entry")
        }
        Err(e) => tracing::warn!(date = %date, error = %e, "entry fetch rejected, keeping cached entry"),
      }
    }
    self.entries.cache().put_batch(batch).await;

    let mut hydrated = BTreeMap::new();
    for date in dates {
      let cached = self
        .entries
        .cache()
        .get(&JournalKey::Date(date).to_string())
        .await;
      hydrated.insert(date, cached.flatten());
    }
    Ok(hydrated)
  }

  // ==========================================================================
  // Writes
  // ==========================================================================

  pub async fn save_entry(&self, entry: JournalEntry) -> Result<WriteOutcome> {
    let payload = encode(&UpsertEntryRequest::from(&entry))?;
    let date = entry.date;
    self
      .entries
      .cache()
      .put(&JournalKey::Date(date).to_string(), Some(entry))
      .await;
    self
      .write(OperationKind::UpsertEntry, date, Some(payload))
      .await
  }

  pub async fn delete_entry(&self, date: NaiveDate) -> Result<WriteOutcome> {
    self
      .entries
      .cache()
      .put(&JournalKey::Date(date).to_string(), None)
      .await;
    self.write(OperationKind::DeleteEntry, date, None).await
  }

  pub async fn save_plans(&self, plans: DayPlans) -> Result<WriteOutcome> {
    let payload = encode(&UpsertPlansRequest {
      date: plans.date,
      items: &plans.items,
    })?;
    let date = plans.date;
    self
      .plans
      .cache()
      .put(&JournalKey::Date(date).to_string(), Some(plans))
      .await;
    self
      .write(OperationKind::UpsertPlans, date, Some(payload))
      .await
  }

  pub async fn delete_plans(&self, date: NaiveDate) -> Result<WriteOutcome> {
    self
      .plans
      .cache()
      .put(&JournalKey::Date(date).to_string(), None)
      .await;
    self.write(OperationKind::DeletePlans, date, None).await
  }

  pub async fn submit_morning(&self, date: NaiveDate, ritual: MorningRitual) -> Result<WriteOutcome> {
    let payload = encode(&MorningRitualRequest {
      date,
      gratitude: &ritual.gratitude,
      intention: &ritual.intention,
    })?;
    self
      .update_entry(date, |entry| entry.morning = Some(ritual))
      .await;
    self
      .write(OperationKind::SubmitMorningRitual, date, Some(payload))
      .await
  }

  pub async fn submit_evening(
    &self,
    date: NaiveDate,
    reflection: EveningReflection,
  ) -> Result<WriteOutcome> {
    let payload = encode(&EveningReflectionRequest {
      date,
      highlights: &reflection.highlights,
      lessons: &reflection.lessons,
      mood: reflection.mood,
    })?;
    self
      .update_entry(date, |entry| entry.evening = Some(reflection))
      .await;
    self
      .write(OperationKind::SubmitEveningReflection, date, Some(payload))
      .await
  }

  pub async fn toggle_habit(&self, date: NaiveDate, toggle: HabitToggle) -> Result<WriteOutcome> {
    let payload = encode(&HabitToggleRequest {
      date,
      habit_id: &toggle.habit_id,
      completed: toggle.completed,
    })?;
    self
      .habits
      .cache()
      .put(
        &JournalKey::DateWith(date, toggle.habit_id.clone()).to_string(),
        HabitStatus {
          completed: toggle.completed,
        },
      )
      .await;
    self
      .write(OperationKind::ToggleHabit, date, Some(payload))
      .await
  }

  /// Apply `f` to the cached entry for `date`, starting from an empty one.
  async fn update_entry<F>(&self, date: NaiveDate, f: F)
  where
    F: FnOnce(&mut JournalEntry),
  {
    let key = JournalKey::Date(date).to_string();
    let mut entry = self
      .entries
      .cache()
      .get(&key)
      .await
      .flatten()
      .unwrap_or_else(|| JournalEntry::new(date));
    f(&mut entry);
    self.entries.cache().put(&key, Some(entry)).await;
  }

  /// Try the network once; queue the write if the network is unavailable.
  async fn write(
    &self,
    kind: OperationKind,
    date: NaiveDate,
    payload: Option<Value>,
  ) -> Result<WriteOutcome> {
    let target = JournalKey::Date(date).to_string();

    // Must not overtake earlier writes to the same day
    if self.queue.has_pending(&target).await {
      return Ok(self.enqueue(kind, target, payload).await);
    }

    match self.inner.mutate(kind, date, payload.clone()).await {
      Ok(()) => Ok(WriteOutcome::Applied),
      Err(e) if e.is_fallback() => {
        tracing::debug!(kind = %kind, target = %target, error = %e, "write deferred");
        Ok(self.enqueue(kind, target, payload).await)
      }
      Err(e) => Err(e),
    }
  }

  async fn enqueue(&self, kind: OperationKind, target: String, payload: Option<Value>) -> WriteOutcome {
    let op = PendingOperation::new(kind, target, payload, self.clock.now());
    self.queue.enqueue(op).await;
    WriteOutcome::Queued
  }

  // ==========================================================================
  // Queue and maintenance
  // ==========================================================================

  /// Push queued writes to the server.
  pub async fn replay(&self) -> ReplayReport {
    let report = self.replay.replay().await;
    if report.unauthenticated {
      tracing::warn!(pending = self.queue.count().await, "replay stopped, sign in again");
    }
    report
  }

  pub async fn pending_count(&self) -> usize {
    self.queue.count().await
  }

  pub async fn pending(&self) -> Vec<PendingOperation> {
    self.queue.list().await
  }

  /// Queued writes that have failed at least `threshold` times.
  pub async fn stuck(&self, threshold: u32) -> Vec<PendingOperation> {
    self.queue.stuck(threshold).await
  }

  /// Give up on a queued write.
  pub async fn discard(&self, id: Uuid) -> Option<PendingOperation> {
    self.queue.discard(id).await
  }

  /// Drop cached data older than `max_age` from every cache. Days with
  /// queued writes are kept whatever their age.
  pub async fn prune(&self, max_age: Duration) -> usize {
    let pinned = self.queue.pending_targets().await;
    let keep = |key: &str| pinned.contains(day_of(key));
    self.entries.cache().prune_unless(max_age, keep).await
      + self.plans.cache().prune_unless(max_age, keep).await
      + self.habits.cache().prune_unless(max_age, keep).await
  }
}
