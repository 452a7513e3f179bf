//! Check-in recorder
//!
//! Shape validation plus a single insert. Stricter rules (weight ranges,
//! minimum text length) belong to the form layer and are not repeated here.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};

use crate::db::{decode_string_list, encode_string_list, from_millis, new_id, to_millis};
use crate::error::CoachError;
use crate::models::{CheckIn, CheckInFields, Measurements};

const SCORE_RANGE: std::ops::RangeInclusive<i64> = 1..=10;

/// Check numeric ranges and required text
pub fn validate_fields(fields: &CheckInFields) -> Result<(), CoachError> {
  if let Some(weight) = fields.weight {
    if !weight.is_finite() || weight <= 0.0 {
      return Err(CoachError::Validation("weight must be a positive number".to_string()));
    }
  }

  for (name, value) in fields.measurements.named() {
    if let Some(v) = value {
      if !v.is_finite() || v <= 0.0 {
        return Err(CoachError::Validation(format!(
          "{} measurement must be a positive number",
          name
        )));
      }
    }
  }

  for (name, score) in [
    ("energyLevel", fields.energy_level),
    ("sleepQuality", fields.sleep_quality),
    ("dietaryAdherence", fields.dietary_adherence),
  ] {
    if !SCORE_RANGE.contains(&score) {
      return Err(CoachError::Validation(format!(
        "{} must be between 1 and 10, got {}",
        name, score
      )));
    }
  }

  if fields.workout_performance.trim().is_empty() {
    return Err(CoachError::Validation("workout performance is required".to_string()));
  }

  if fields.photo_refs.iter().any(|r| r.trim().is_empty()) {
    return Err(CoachError::Validation("photo references must not be blank".to_string()));
  }

  Ok(())
}

/// Insert one check-in through any executor, so callers can bundle it into
/// a transaction. Returns the new id.
pub async fn insert_check_in<'e, E>(
  executor: E,
  user_id: &str,
  fields: &CheckInFields,
  created_at: DateTime<Utc>,
) -> Result<String, CoachError>
where
  E: sqlx::Executor<'e, Database = Sqlite>,
{
  validate_fields(fields)?;

  let id = new_id();
  let m = &fields.measurements;

  sqlx::query(
    r#"
    INSERT INTO check_ins (
      id, user_id, weight_kg, chest_cm, waist_cm, hips_cm, arms_cm, thighs_cm,
      workout_performance, energy_level, sleep_quality, dietary_adherence,
      notes, photo_refs_json, created_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
    "#,
  )
  .bind(&id)
  .bind(user_id)
  .bind(fields.weight)
  .bind(m.chest)
  .bind(m.waist)
  .bind(m.hips)
  .bind(m.arms)
  .bind(m.thighs)
  .bind(fields.workout_performance.trim())
  .bind(fields.energy_level)
  .bind(fields.sleep_quality)
  .bind(fields.dietary_adherence)
  .bind(&fields.notes)
  .bind(encode_string_list(&fields.photo_refs))
  .bind(to_millis(created_at))
  .execute(executor)
  .await?;

  Ok(id)
}

/// Record a check-in for a user
pub async fn record(
  pool: &SqlitePool,
  user_id: &str,
  fields: &CheckInFields,
) -> Result<String, CoachError> {
  let id = insert_check_in(pool, user_id, fields, Utc::now()).await?;
  tracing::info!(user_id, check_in_id = %id, "check-in recorded");
  Ok(id)
}

fn row_to_check_in(row: &SqliteRow) -> CheckIn {
  CheckIn {
    id: row.get("id"),
    user_id: row.get("user_id"),
    fields: CheckInFields {
      weight: row.get("weight_kg"),
      measurements: Measurements {
        chest: row.get("chest_cm"),
        waist: row.get("waist_cm"),
        hips: row.get("hips_cm"),
        arms: row.get("arms_cm"),
        thighs: row.get("thighs_cm"),
      },
      workout_performance: row.get("workout_performance"),
      energy_level: row.get("energy_level"),
      sleep_quality: row.get("sleep_quality"),
      dietary_adherence: row.get("dietary_adherence"),
      notes: row.get("notes"),
      photo_refs: decode_string_list(row.get("photo_refs_json")),
    },
    created_at: from_millis(row.get("created_at")),
  }
}

/// Load a check-in owned by `user_id`
pub async fn get_check_in(
  pool: &SqlitePool,
  user_id: &str,
  check_in_id: &str,
) -> Result<Option<CheckIn>, CoachError> {
  let row = sqlx::query("SELECT * FROM check_ins WHERE id = ?1 AND user_id = ?2")
    .bind(check_in_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

  Ok(row.as_ref().map(row_to_check_in))
}

/// Check-in history, most recent first (progress charts)
pub async fn list_check_ins(
  pool: &SqlitePool,
  user_id: &str,
  limit: i64,
) -> Result<Vec<CheckIn>, CoachError> {
  let rows = sqlx::query(
    r#"
    SELECT * FROM check_ins
    WHERE user_id = ?1
    ORDER BY created_at DESC, rowid DESC
    LIMIT ?2
    "#,
  )
  .bind(user_id)
  .bind(limit)
  .fetch_all(pool)
  .await?;

  Ok(rows.iter().map(row_to_check_in).collect())
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
