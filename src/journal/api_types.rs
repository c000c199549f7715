//! Serde types matching the journal API's request and response bodies.
//!
//! These are kept apart from the domain types so that decoding can be lenient
//! about what the server sends while the cached domain types stay strict.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::types::{DayPlans, EveningReflection, JournalEntry, MorningRitual, PlanItem};

/// Timestamps arrive as ISO-8601 with or without fractional seconds, or as a
/// bare `yyyy-MM-dd`. All three decode to the same `DateTime<Utc>`.
pub mod flexible_datetime {
  use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
  use serde::{de, Deserialize, Deserializer};

  pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
      return Some(dt.with_timezone(&Utc));
    }
    // No offset: the server means UTC
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
      return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
      .ok()
      .and_then(|d| d.and_hms_opt(0, 0, 0))
      .map(|naive| naive.and_utc())
  }

  /// Calendar date of a date-valued field, as written by the server.
  pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
      return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
      return Some(dt.date_naive());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
      .ok()
      .map(|naive| naive.date())
  }

  pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>,
  {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| de::Error::custom(format!("unrecognized timestamp: {}", raw)))
  }

  pub mod option {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
      D: Deserializer<'de>,
    {
      match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse(&raw)
          .map(Some)
          .ok_or_else(|| de::Error::custom(format!("unrecognized timestamp: {}", raw))),
      }
    }
  }

  pub mod date {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
      D: Deserializer<'de>,
    {
      let raw = String::deserialize(deserializer)?;
      parse_date(&raw).ok_or_else(|| de::Error::custom(format!("unrecognized date: {}", raw)))
    }
  }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEntry {
  #[serde(deserialize_with = "flexible_datetime::date::deserialize")]
  pub date: NaiveDate,
  #[serde(default)]
  pub mood: Option<u8>,
  #[serde(default)]
  pub content: Option<String>,
  #[serde(default)]
  pub morning: Option<ApiMorningRitual>,
  #[serde(default)]
  pub evening: Option<ApiEveningReflection>,
  #[serde(default, deserialize_with = "flexible_datetime::option::deserialize")]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMorningRitual {
  #[serde(default)]
  pub gratitude: Vec<String>,
  #[serde(default)]
  pub intention: Option<String>,
  #[serde(default, deserialize_with = "flexible_datetime::option::deserialize")]
  pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEveningReflection {
  #[serde(default)]
  pub highlights: Option<String>,
  #[serde(default)]
  pub lessons: Option<String>,
  #[serde(default)]
  pub mood: Option<u8>,
  #[serde(default, deserialize_with = "flexible_datetime::option::deserialize")]
  pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ApiPlans {
  #[serde(deserialize_with = "flexible_datetime::date::deserialize")]
  pub date: NaiveDate,
  #[serde(default)]
  pub items: Vec<PlanItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTokenPair {
  pub access_token: String,
  pub refresh_token: String,
}

impl ApiEntry {
  pub fn into_entry(self) -> JournalEntry {
    JournalEntry {
      date: self.date,
      mood: self.mood,
      content: self.content.unwrap_or_default(),
      morning: self.morning.map(|m| MorningRitual {
        gratitude: m.gratitude,
        intention: m.intention.unwrap_or_default(),
        completed_at: m.completed_at,
      }),
      evening: self.evening.map(|e| EveningReflection {
        highlights: e.highlights.unwrap_or_default(),
        lessons: e.lessons.unwrap_or_default(),
        mood: e.mood,
        completed_at: e.completed_at,
      }),
      updated_at: self.updated_at,
    }
  }
}

impl ApiPlans {
  pub fn into_plans(self) -> DayPlans {
    DayPlans {
      date: self.date,
      items: self.items,
    }
  }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertEntryRequest<'a> {
  pub date: NaiveDate,
  pub mood: Option<u8>,
  pub content: &'a str,
}

impl<'a> From<&'a JournalEntry> for UpsertEntryRequest<'a> {
  fn from(entry: &'a JournalEntry) -> Self {
    Self {
      date: entry.date,
      mood: entry.mood,
      content: &entry.content,
    }
  }
}

#[derive(Debug, Serialize)]
pub struct UpsertPlansRequest<'a> {
  pub date: NaiveDate,
  pub items: &'a [PlanItem],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MorningRitualRequest<'a> {
  pub date: NaiveDate,
  pub gratitude: &'a [String],
  pub intention: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EveningReflectionRequest<'a> {
  pub date: NaiveDate,
  pub highlights: &'a str,
  pub lessons: &'a str,
  pub mood: Option<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitToggleRequest<'a> {
  pub date: NaiveDate,
  pub habit_id: &'a str,
  pub completed: bool,
}

#[derive(Debug, Serialize)]
pub struct SignInRequest<'a> {
  pub email: &'a str,
  pub password: &'a str,
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_timestamp_formats_are_interchangeable() {
    let midnight = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    assert_eq!(flexible_datetime::parse("2025-06-01T00:00:00Z"), Some(midnight));
    assert_eq!(flexible_datetime::parse("2025-06-01T00:00:00.000Z"), Some(midnight));
    assert_eq!(flexible_datetime::parse("2025-06-01T00:00:00"), Some(midnight));
    assert_eq!(flexible_datetime::parse("2025-06-01"), Some(midnight));
    assert_eq!(flexible_datetime::parse("June 1st"), None);
  }

  #[test]
  fn test_date_keeps_server_calendar_day() {
    let june_first = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    assert_eq!(flexible_datetime::parse_date("2025-06-01"), Some(june_first));
    assert_eq!(
      flexible_datetime::parse_date("2025-06-01T01:00:00.123+05:00"),
      Some(june_first)
    );
  }

  #[test]
  fn test_entry_decodes_mixed_date_formats() {
    let entry: ApiEntry = serde_json::from_str(
      r#"{
        "date": "2025-06-01T00:00:00.000Z",
        "mood": 4,
        "content": "ran 5k",
        "morning": { "gratitude": ["coffee"], "completedAt": "2025-06-01" },
        "updatedAt": "2025-06-01T07:30:00Z"
      }"#,
    )
    .unwrap();

    let entry = entry.into_entry();
    assert_eq!(entry.date, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
    assert_eq!(entry.content, "ran 5k");
    let morning = entry.morning.unwrap();
    assert_eq!(morning.gratitude, vec!["coffee".to_string()]);
    assert_eq!(morning.intention, "");
    assert!(morning.completed_at.is_some());
    assert!(entry.evening.is_none());
    assert_eq!(
      entry.updated_at,
      Some(Utc.with_ymd_and_hms(2025, 6, 1, 7, 30, 0).unwrap())
    );
  }

  #[test]
  fn test_bad_timestamp_is_an_error() {
    let result: Result<ApiEntry, _> =
      serde_json::from_str(r#"{ "date": "2025-06-01", "updatedAt": "yesterday" }"#);
    assert!(result.is_err());
  }
}
