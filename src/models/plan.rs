use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};

use crate::i18n::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
  Meal,
  Workout,
}

impl PlanKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Meal => "meal",
      Self::Workout => "workout",
    }
  }

  /// Each kind lives in its own table with identical columns
  pub(crate) fn table(&self) -> &'static str {
    match self {
      Self::Meal => "meal_plans",
      Self::Workout => "workout_plans",
    }
  }
}

impl std::fmt::Display for PlanKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Generated plan body. `Unparsed` keeps the raw model output when it was
/// not valid JSON so the client can still show something.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanContent {
  Structured(Value),
  Unparsed { raw_text: String },
}

impl PlanContent {
  pub fn is_parse_error(&self) -> bool {
    matches!(self, Self::Unparsed { .. })
  }

  /// Client-facing payload: the structured tree, or `{raw, parseError: true}`
  pub fn to_payload(&self) -> Value {
    match self {
      Self::Structured(value) => value.clone(),
      Self::Unparsed { raw_text } => json!({ "raw": raw_text, "parseError": true }),
    }
  }
}

impl Serialize for PlanContent {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    self.to_payload().serialize(serializer)
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
  pub id: String,
  pub kind: PlanKind,
  pub user_id: String,
  pub check_in_id: Option<String>,
  pub language: Language,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  pub content: PlanContent,
  pub raw_text: String,
  pub stream_handle: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl Plan {
  pub fn covers(&self, day: NaiveDate) -> bool {
    self.start_date <= day && day <= self.end_date
  }
}

/// For inserting new plans (without id, created_at)
#[derive(Debug, Clone)]
pub struct NewPlan {
  pub kind: PlanKind,
  pub user_id: String,
  pub check_in_id: Option<String>,
  pub language: Language,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  pub content: PlanContent,
  pub raw_text: String,
}
