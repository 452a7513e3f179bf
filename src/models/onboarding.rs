use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::i18n::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
  Beginner,
  Intermediate,
  Advanced,
}

impl ExperienceLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Beginner => "beginner",
      Self::Intermediate => "intermediate",
      Self::Advanced => "advanced",
    }
  }
}

impl std::str::FromStr for ExperienceLevel {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "beginner" => Ok(Self::Beginner),
      "intermediate" => Ok(Self::Intermediate),
      "advanced" => Ok(Self::Advanced),
      _ => Err(format!("Unknown experience level: {}", s)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoachingStatus {
  #[default]
  Active,
  Paused,
  Ended,
}

impl CoachingStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Active => "active",
      Self::Paused => "paused",
      Self::Ended => "ended",
    }
  }

  /// Unknown values read as active
  pub fn parse(s: &str) -> Self {
    match s {
      "paused" => Self::Paused,
      "ended" => Self::Ended,
      _ => Self::Active,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  #[default]
  Client,
  Coach,
}

impl Role {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Client => "client",
      Self::Coach => "coach",
    }
  }

  pub fn parse(s: &str) -> Self {
    if s == "coach" {
      Self::Coach
    } else {
      Self::Client
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
  pub user_id: String,
  pub display_name: Option<String>,
  pub email: Option<String>,
  pub preferred_language: Language,
  pub coaching_status: CoachingStatus,
  pub role: Role,
  pub updated_at: DateTime<Utc>,
}

/// Onboarding questionnaire, one per user. Resubmission overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
  pub goals: String,
  pub experience_level: ExperienceLevel,
  pub age: Option<i64>,
  pub gender: Option<String>,
  pub height_cm: Option<f64>,
  pub weight_kg: Option<f64>,
  pub target_weight_kg: Option<f64>,
  pub activity_level: Option<String>,
  #[serde(default)]
  pub dietary_preferences: Vec<String>,
  #[serde(default)]
  pub allergies: Vec<String>,
  #[serde(default)]
  pub dietary_restrictions: Vec<String>,
  #[serde(default)]
  pub equipment: Vec<String>,
  pub training_days_per_week: Option<i64>,
  pub session_minutes: Option<i64>,
  pub medical_notes: Option<String>,
}
