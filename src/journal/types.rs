use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One day's journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
  pub date: NaiveDate,
  /// 1-5
  pub mood: Option<u8>,
  #[serde(default)]
  pub content: String,
  #[serde(default)]
  pub morning: Option<MorningRitual>,
  #[serde(default)]
  pub evening: Option<EveningReflection>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

impl JournalEntry {
  /// An empty entry for `date`.
  pub fn new(date: NaiveDate) -> Self {
    Self {
      date,
      mood: None,
      content: String::new(),
      morning: None,
      evening: None,
      updated_at: None,
    }
  }
}

/// Planned items for a day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlans {
  pub date: NaiveDate,
  #[serde(default)]
  pub items: Vec<PlanItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
  pub id: Uuid,
  pub title: String,
  #[serde(default)]
  pub done: bool,
}

impl PlanItem {
  pub fn new(title: impl Into<String>) -> Self {
    Self {
      id: Uuid::new_v4(),
      title: title.into(),
      done: false,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MorningRitual {
  #[serde(default)]
  pub gratitude: Vec<String>,
  #[serde(default)]
  pub intention: String,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EveningReflection {
  #[serde(default)]
  pub highlights: String,
  #[serde(default)]
  pub lessons: String,
  pub mood: Option<u8>,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
}

/// Mark a habit done or not done for a day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitToggle {
  pub habit_id: String,
  pub completed: bool,
}

/// Cached completion state of one habit on one day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitStatus {
  pub completed: bool,
}
