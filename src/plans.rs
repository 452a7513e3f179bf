//! Meal and workout plan storage
//!
//! Both kinds share one column layout in separate tables. Plans are written
//! once; the only later change is patching in repaired content.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::{from_millis, new_id, to_millis};
use crate::error::CoachError;
use crate::i18n::Language;
use crate::models::plan::NewPlan;
use crate::models::{Plan, PlanContent, PlanKind};

/// Validity window `[today, today + duration_days]`
pub fn plan_window(today: NaiveDate, duration_days: i64) -> (NaiveDate, NaiveDate) {
  (today, today + Duration::days(duration_days))
}

pub async fn insert_plan(pool: &SqlitePool, plan: &NewPlan) -> Result<String, CoachError> {
  let id = new_id();

  let (content_json, parse_error) = match &plan.content {
    PlanContent::Structured(value) => (Some(serde_json::to_string(value)?), false),
    PlanContent::Unparsed { .. } => (None, true),
  };

  let sql = format!(
    r#"
    INSERT INTO {} (
      id, user_id, check_in_id, language, start_date, end_date,
      content_json, parse_error, raw_text, created_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    "#,
    plan.kind.table()
  );

  sqlx::query(&sql)
    .bind(&id)
    .bind(&plan.user_id)
    .bind(&plan.check_in_id)
    .bind(plan.language.code())
    .bind(plan.start_date)
    .bind(plan.end_date)
    .bind(content_json)
    .bind(parse_error)
    .bind(&plan.raw_text)
    .bind(to_millis(Utc::now()))
    .execute(pool)
    .await?;

  Ok(id)
}

fn row_to_plan(kind: PlanKind, row: &SqliteRow) -> Result<Plan, CoachError> {
  let raw_text: String = row.get("raw_text");
  let parse_error: bool = row.get("parse_error");
  let content_json: Option<String> = row.get("content_json");

  let content = match (parse_error, content_json) {
    (false, Some(json)) => PlanContent::Structured(serde_json::from_str(&json)?),
    _ => PlanContent::Unparsed {
      raw_text: raw_text.clone(),
    },
  };

  let language: String = row.get("language");

  Ok(Plan {
    id: row.get("id"),
    kind,
    user_id: row.get("user_id"),
    check_in_id: row.get("check_in_id"),
    language: Language::from_code(&language),
    start_date: row.get("start_date"),
    end_date: row.get("end_date"),
    content,
    raw_text,
    stream_handle: row.get("stream_handle"),
    created_at: from_millis(row.get("created_at")),
  })
}

/// Load a plan owned by `user_id`
pub async fn get_plan(
  pool: &SqlitePool,
  kind: PlanKind,
  user_id: &str,
  plan_id: &str,
) -> Result<Option<Plan>, CoachError> {
  let sql = format!("SELECT * FROM {} WHERE id = ?1 AND user_id = ?2", kind.table());
  let row = sqlx::query(&sql)
    .bind(plan_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

  row.as_ref().map(|r| row_to_plan(kind, r)).transpose()
}

/// Plan history, newest first
pub async fn list_plans(
  pool: &SqlitePool,
  kind: PlanKind,
  user_id: &str,
) -> Result<Vec<Plan>, CoachError> {
  let sql = format!(
    "SELECT * FROM {} WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
    kind.table()
  );
  let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;

  rows.iter().map(|r| row_to_plan(kind, r)).collect()
}

/// Most recent plan whose window contains `today`, else the most recent plan
/// overall, else `None`
pub async fn get_current_plan(
  pool: &SqlitePool,
  kind: PlanKind,
  user_id: &str,
  today: NaiveDate,
) -> Result<Option<Plan>, CoachError> {
  let plans = list_plans(pool, kind, user_id).await?;
  Ok(select_current(plans, today))
}

/// `plans` must be ordered newest first
pub fn select_current(plans: Vec<Plan>, today: NaiveDate) -> Option<Plan> {
  let covering = plans.iter().position(|p| p.covers(today));
  match covering {
    Some(idx) => plans.into_iter().nth(idx),
    None => plans.into_iter().next(),
  }
}

/// Meal + workout plans created for a user at or after `since`
pub async fn count_plans_since(
  pool: &SqlitePool,
  user_id: &str,
  since: DateTime<Utc>,
) -> Result<i64, CoachError> {
  let count: i64 = sqlx::query_scalar(
    r#"
    SELECT
      (SELECT COUNT(*) FROM meal_plans WHERE user_id = ?1 AND created_at >= ?2) +
      (SELECT COUNT(*) FROM workout_plans WHERE user_id = ?1 AND created_at >= ?2)
    "#,
  )
  .bind(user_id)
  .bind(to_millis(since))
  .fetch_one(pool)
  .await?;

  Ok(count)
}

/// Creation times of the plans counted by [`count_plans_since`], oldest first
pub async fn plan_times_since(
  pool: &SqlitePool,
  user_id: &str,
  since: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, CoachError> {
  let times: Vec<i64> = sqlx::query_scalar(
    r#"
    SELECT created_at FROM meal_plans WHERE user_id = ?1 AND created_at >= ?2
    UNION ALL
    SELECT created_at FROM workout_plans WHERE user_id = ?1 AND created_at >= ?2
    ORDER BY created_at ASC
    "#,
  )
  .bind(user_id)
  .bind(to_millis(since))
  .fetch_all(pool)
  .await?;

  Ok(times.into_iter().map(from_millis).collect())
}

/// Replace a parse-failed plan's content with repaired structured content.
/// Plans that already parsed are left untouched.
pub async fn patch_plan_content(
  pool: &SqlitePool,
  kind: PlanKind,
  plan_id: &str,
  content: &serde_json::Value,
) -> Result<bool, CoachError> {
  let sql = format!(
    "UPDATE {} SET content_json = ?1, parse_error = 0 WHERE id = ?2 AND parse_error = 1",
    kind.table()
  );
  let result = sqlx::query(&sql)
    .bind(serde_json::to_string(content)?)
    .bind(plan_id)
    .execute(pool)
    .await?;

  Ok(result.rows_affected() > 0)
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
