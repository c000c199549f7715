//! Caching implementations for journal types.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;

use crate::cache::{Cacheable, PinnedKeys};
use crate::queue::WriteQueue;

use super::types::{DayPlans, HabitStatus, JournalEntry};

// ============================================================================
// Cacheable implementations
// ============================================================================

// `None` is a confirmed "nothing written for this day", which is also the
// safe default when offline with nothing cached.
impl Cacheable for Option<JournalEntry> {
  fn namespace() -> &'static str {
    "entries"
  }
}

impl Cacheable for Option<DayPlans> {
  fn namespace() -> &'static str {
    "plans"
  }
}

impl Cacheable for HabitStatus {
  fn namespace() -> &'static str {
    "habits"
  }
}

// ============================================================================
// Cache keys
// ============================================================================

/// Logical cache key, independent of any server-side id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JournalKey {
  /// Everything keyed by day alone (entries, plans)
  Date(NaiveDate),
  /// A day plus a secondary key, e.g. one habit on one day
  DateWith(NaiveDate, String),
}

impl JournalKey {
  pub fn date(&self) -> NaiveDate {
    match self {
      Self::Date(d) | Self::DateWith(d, _) => *d,
    }
  }
}

impl fmt::Display for JournalKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
      Self::DateWith(d, secondary) => write!(f, "{}:{}", d.format("%Y-%m-%d"), secondary),
    }
  }
}

/// The day a rendered key belongs to, which is also its write-queue target.
pub fn day_of(key: &str) -> &str {
  key.split_once(':').map_or(key, |(day, _)| day)
}

// ============================================================================
// Pinning
// ============================================================================

/// Pins every cached key whose day still has queued writes.
pub(crate) struct PendingDays(pub(crate) Arc<WriteQueue>);

#[async_trait]
impl PinnedKeys for PendingDays {
  async fn is_pinned(&self, key: &str) -> bool {
    self.0.has_pending(day_of(key)).await
  }
}
