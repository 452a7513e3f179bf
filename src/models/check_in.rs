use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optional body measurements in centimetres
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurements {
  pub chest: Option<f64>,
  pub waist: Option<f64>,
  pub hips: Option<f64>,
  pub arms: Option<f64>,
  pub thighs: Option<f64>,
}

impl Measurements {
  pub fn named(&self) -> [(&'static str, Option<f64>); 5] {
    [
      ("chest", self.chest),
      ("waist", self.waist),
      ("hips", self.hips),
      ("arms", self.arms),
      ("thighs", self.thighs),
    ]
  }

  pub fn is_empty(&self) -> bool {
    self.named().iter().all(|(_, v)| v.is_none())
  }
}

/// Client-submitted check-in fields (no id, no timestamps)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInFields {
  pub weight: Option<f64>,
  #[serde(default)]
  pub measurements: Measurements,
  pub workout_performance: String,
  pub energy_level: i64,
  pub sleep_quality: i64,
  pub dietary_adherence: i64,
  #[serde(default)]
  pub notes: Option<String>,
  #[serde(default)]
  pub photo_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
  pub id: String,
  pub user_id: String,
  #[serde(flatten)]
  pub fields: CheckInFields,
  pub created_at: DateTime<Utc>,
}
