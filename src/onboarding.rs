//! Profile, assessment and coach-settings records
//!
//! Plain upsert/read access. These are read-only inputs to plan generation
//! and the rate gate.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::db::{decode_string_list, encode_string_list, from_millis, to_millis};
use crate::error::CoachError;
use crate::i18n::Language;
use crate::models::{Assessment, CoachingStatus, ExperienceLevel, Profile, Role};

pub const MAX_CYCLE_LENGTH_DAYS: i64 = 365;

/// Fields a profile upsert may set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
  pub display_name: Option<String>,
  pub email: Option<String>,
  #[serde(default)]
  pub preferred_language: Language,
  #[serde(default)]
  pub coaching_status: CoachingStatus,
}

/// ---------------------------------------------------------------------------
/// Profiles
/// ---------------------------------------------------------------------------

/// Insert or update a profile. Role is preserved on update; new profiles are
/// clients.
pub async fn upsert_profile(
  pool: &SqlitePool,
  user_id: &str,
  input: &ProfileInput,
) -> Result<(), CoachError> {
  let now = to_millis(Utc::now());

  sqlx::query(
    r#"
    INSERT INTO profiles (
      user_id, display_name, email, preferred_language, coaching_status,
      role, created_at, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, 'client', ?6, ?6)
    ON CONFLICT(user_id) DO UPDATE SET
      display_name = excluded.display_name,
      email = excluded.email,
      preferred_language = excluded.preferred_language,
      coaching_status = excluded.coaching_status,
      updated_at = excluded.updated_at
    "#,
  )
  .bind(user_id)
  .bind(&input.display_name)
  .bind(&input.email)
  .bind(input.preferred_language.code())
  .bind(input.coaching_status.as_str())
  .bind(now)
  .execute(pool)
  .await?;

  Ok(())
}

/// Change a user's role (admin tooling / seeding only)
pub async fn set_role(pool: &SqlitePool, user_id: &str, role: Role) -> Result<(), CoachError> {
  let result = sqlx::query("UPDATE profiles SET role = ?1, updated_at = ?2 WHERE user_id = ?3")
    .bind(role.as_str())
    .bind(to_millis(Utc::now()))
    .bind(user_id)
    .execute(pool)
    .await?;

  if result.rows_affected() == 0 {
    return Err(CoachError::NotFound(format!("profile for user {}", user_id)));
  }
  Ok(())
}

pub async fn get_profile(pool: &SqlitePool, user_id: &str) -> Result<Option<Profile>, CoachError> {
  let row = sqlx::query(
    r#"
    SELECT user_id, display_name, email, preferred_language, coaching_status, role, updated_at
    FROM profiles
    WHERE user_id = ?1
    "#,
  )
  .bind(user_id)
  .fetch_optional(pool)
  .await?;

  Ok(row.map(|row| {
    let language: String = row.get("preferred_language");
    let status: String = row.get("coaching_status");
    let role: String = row.get("role");
    Profile {
      user_id: row.get("user_id"),
      display_name: row.get("display_name"),
      email: row.get("email"),
      preferred_language: Language::from_code(&language),
      coaching_status: CoachingStatus::parse(&status),
      role: Role::parse(&role),
      updated_at: from_millis(row.get("updated_at")),
    }
  }))
}

/// Fail with `Forbidden` unless the user has the coach role
pub async fn require_coach(pool: &SqlitePool, user_id: &str) -> Result<Profile, CoachError> {
  match get_profile(pool, user_id).await? {
    Some(profile) if profile.role == Role::Coach => Ok(profile),
    _ => Err(CoachError::Forbidden("coach access required".to_string())),
  }
}

/// ---------------------------------------------------------------------------
/// Assessments
/// ---------------------------------------------------------------------------

pub async fn upsert_assessment(
  pool: &SqlitePool,
  user_id: &str,
  assessment: &Assessment,
) -> Result<(), CoachError> {
  sqlx::query(
    r#"
    INSERT INTO assessments (
      user_id, goals, experience_level, age, gender, height_cm, weight_kg,
      target_weight_kg, activity_level, dietary_preferences_json, allergies_json,
      dietary_restrictions_json, equipment_json, training_days_per_week,
      session_minutes, medical_notes, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
    ON CONFLICT(user_id) DO UPDATE SET
      goals = excluded.goals,
      experience_level = excluded.experience_level,
      age = excluded.age,
      gender = excluded.gender,
      height_cm = excluded.height_cm,
      weight_kg = excluded.weight_kg,
      target_weight_kg = excluded.target_weight_kg,
      activity_level = excluded.activity_level,
      dietary_preferences_json = excluded.dietary_preferences_json,
      allergies_json = excluded.allergies_json,
      dietary_restrictions_json = excluded.dietary_restrictions_json,
      equipment_json = excluded.equipment_json,
      training_days_per_week = excluded.training_days_per_week,
      session_minutes = excluded.session_minutes,
      medical_notes = excluded.medical_notes,
      updated_at = excluded.updated_at
    "#,
  )
  .bind(user_id)
  .bind(&assessment.goals)
  .bind(assessment.experience_level.as_str())
  .bind(assessment.age)
  .bind(&assessment.gender)
  .bind(assessment.height_cm)
  .bind(assessment.weight_kg)
  .bind(assessment.target_weight_kg)
  .bind(&assessment.activity_level)
  .bind(encode_string_list(&assessment.dietary_preferences))
  .bind(encode_string_list(&assessment.allergies))
  .bind(encode_string_list(&assessment.dietary_restrictions))
  .bind(encode_string_list(&assessment.equipment))
  .bind(assessment.training_days_per_week)
  .bind(assessment.session_minutes)
  .bind(&assessment.medical_notes)
  .bind(to_millis(Utc::now()))
  .execute(pool)
  .await?;

  Ok(())
}

pub async fn get_assessment(
  pool: &SqlitePool,
  user_id: &str,
) -> Result<Option<Assessment>, CoachError> {
  let row = sqlx::query("SELECT * FROM assessments WHERE user_id = ?1")
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

  let Some(row) = row else {
    return Ok(None);
  };

  let level: String = row.get("experience_level");
  let experience_level: ExperienceLevel = level.parse().map_err(CoachError::Validation)?;

  Ok(Some(Assessment {
    goals: row.get("goals"),
    experience_level,
    age: row.get("age"),
    gender: row.get("gender"),
    height_cm: row.get("height_cm"),
    weight_kg: row.get("weight_kg"),
    target_weight_kg: row.get("target_weight_kg"),
    activity_level: row.get("activity_level"),
    dietary_preferences: decode_string_list(row.get("dietary_preferences_json")),
    allergies: decode_string_list(row.get("allergies_json")),
    dietary_restrictions: decode_string_list(row.get("dietary_restrictions_json")),
    equipment: decode_string_list(row.get("equipment_json")),
    training_days_per_week: row.get("training_days_per_week"),
    session_minutes: row.get("session_minutes"),
    medical_notes: row.get("medical_notes"),
  }))
}

/// ---------------------------------------------------------------------------
/// Coach Settings
/// ---------------------------------------------------------------------------

/// Current cycle length. Read fresh on every call so coach edits apply
/// immediately.
pub async fn get_cycle_length_days(pool: &SqlitePool, default_days: i64) -> Result<i64, CoachError> {
  let configured: Option<Option<i64>> =
    sqlx::query_scalar("SELECT cycle_length_days FROM coach_settings WHERE id = 1")
      .fetch_optional(pool)
      .await?;

  Ok(
    configured
      .flatten()
      .filter(|days| *days > 0)
      .unwrap_or(default_days),
  )
}

pub async fn set_cycle_length_days(
  pool: &SqlitePool,
  days: i64,
  updated_by: &str,
) -> Result<(), CoachError> {
  if !(1..=MAX_CYCLE_LENGTH_DAYS).contains(&days) {
    return Err(CoachError::Validation(format!(
      "cycle length must be between 1 and {} days, got {}",
      MAX_CYCLE_LENGTH_DAYS, days
    )));
  }

  sqlx::query(
    r#"
    INSERT INTO coach_settings (id, cycle_length_days, updated_by, updated_at)
    VALUES (1, ?1, ?2, ?3)
    ON CONFLICT(id) DO UPDATE SET
      cycle_length_days = excluded.cycle_length_days,
      updated_by = excluded.updated_by,
      updated_at = excluded.updated_at
    "#,
  )
  .bind(days)
  .bind(updated_by)
  .bind(to_millis(Utc::now()))
  .execute(pool)
  .await?;

  tracing::info!(days, updated_by, "coach cycle length updated");
  Ok(())
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::{mock_assessment, setup_test_db, teardown_test_db};

  #[tokio::test]
  async fn test_assessment_upsert_overwrites() {
    let pool = setup_test_db().await;

    let mut assessment = mock_assessment();
    upsert_assessment(&pool, "user-1", &assessment).await.unwrap();

    assessment.goals = "Run a half marathon".to_string();
    assessment.experience_level = ExperienceLevel::Advanced;
    assessment.allergies = vec![];
    upsert_assessment(&pool, "user-1", &assessment).await.unwrap();

    let stored = get_assessment(&pool, "user-1").await.unwrap().unwrap();
    assert_eq!(stored.goals, "Run a half marathon");
    assert_eq!(stored.experience_level, ExperienceLevel::Advanced);
    assert!(stored.allergies.is_empty());
    assert_eq!(stored.equipment, mock_assessment().equipment);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM assessments")
      .fetch_one(&pool)
      .await
      .unwrap();
    assert_eq!(count, 1);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_profile_upsert_preserves_role() {
    let pool = setup_test_db().await;

    upsert_profile(&pool, "coach-1", &ProfileInput::default()).await.unwrap();
    set_role(&pool, "coach-1", Role::Coach).await.unwrap();

    let input = ProfileInput {
      display_name: Some("Coach Lina".to_string()),
      preferred_language: Language::Ar,
      ..Default::default()
    };
    upsert_profile(&pool, "coach-1", &input).await.unwrap();

    let profile = get_profile(&pool, "coach-1").await.unwrap().unwrap();
    assert_eq!(profile.role, Role::Coach);
    assert_eq!(profile.preferred_language, Language::Ar);
    assert_eq!(profile.display_name.as_deref(), Some("Coach Lina"));
    assert!(require_coach(&pool, "coach-1").await.is_ok());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_require_coach_rejects_clients_and_unknown_users() {
    let pool = setup_test_db().await;
    upsert_profile(&pool, "client-1", &ProfileInput::default()).await.unwrap();

    assert!(matches!(
      require_coach(&pool, "client-1").await,
      Err(CoachError::Forbidden(_))
    ));
    assert!(matches!(
      require_coach(&pool, "nobody").await,
      Err(CoachError::Forbidden(_))
    ));
    assert!(matches!(
      set_role(&pool, "nobody", Role::Coach).await,
      Err(CoachError::NotFound(_))
    ));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_cycle_length_defaults_and_updates() {
    let pool = setup_test_db().await;

    assert_eq!(get_cycle_length_days(&pool, 14).await.unwrap(), 14);

    set_cycle_length_days(&pool, 28, "coach-1").await.unwrap();
    assert_eq!(get_cycle_length_days(&pool, 14).await.unwrap(), 28);

    assert!(set_cycle_length_days(&pool, 0, "coach-1").await.is_err());
    assert_eq!(get_cycle_length_days(&pool, 14).await.unwrap(), 28);

    teardown_test_db(pool).await;
  }
}
