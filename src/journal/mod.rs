//! Typed journal domain on top of the sync layer.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod types;

pub use cache::JournalKey;
pub use cached_client::{CachedJournalClient, Stores, SyncSettings, WriteOutcome};
pub use client::{JournalClient, SIGN_IN_PATH};
pub use types::{
  DayPlans, EveningReflection, HabitStatus, HabitToggle, JournalEntry, MorningRitual, PlanItem,
};
