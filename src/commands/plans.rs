//! Plan reads, repair and manual regeneration

use chrono::Utc;

use crate::commands::current_profile;
use crate::error::CoachError;
use crate::generator::{self, GenerationRequest};
use crate::i18n::Language;
use crate::identity::{require_user, IdentityProvider};
use crate::models::{Plan, PlanKind};
use crate::onboarding;
use crate::plans;
use crate::queue::{self, JobStatus};
use crate::state::AppState;

pub async fn get_current_meal_plan(
  state: &AppState,
  identity: &dyn IdentityProvider,
) -> Result<Option<Plan>, CoachError> {
  let user_id = require_user(identity)?;
  plans::get_current_plan(&state.db, PlanKind::Meal, &user_id, Utc::now().date_naive()).await
}

pub async fn get_current_workout_plan(
  state: &AppState,
  identity: &dyn IdentityProvider,
) -> Result<Option<Plan>, CoachError> {
  let user_id = require_user(identity)?;
  plans::get_current_plan(&state.db, PlanKind::Workout, &user_id, Utc::now().date_naive()).await
}

pub async fn list_plans(
  state: &AppState,
  identity: &dyn IdentityProvider,
  kind: PlanKind,
) -> Result<Vec<Plan>, CoachError> {
  let user_id = require_user(identity)?;
  plans::list_plans(&state.db, kind, &user_id).await
}

pub async fn get_plan(
  state: &AppState,
  identity: &dyn IdentityProvider,
  kind: PlanKind,
  plan_id: String,
) -> Result<Plan, CoachError> {
  let user_id = require_user(identity)?;
  plans::get_plan(&state.db, kind, &user_id, &plan_id)
    .await?
    .ok_or_else(|| CoachError::NotFound(format!("{} plan {}", kind, plan_id)))
}

pub async fn repair_plan(
  state: &AppState,
  identity: &dyn IdentityProvider,
  kind: PlanKind,
  plan_id: String,
) -> Result<Plan, CoachError> {
  let user_id = require_user(identity)?;
  generator::repair_plan(&state.db, kind, &user_id, &plan_id).await
}

/// Queue a single plan regeneration outside the check-in flow. Counts
/// against the same cycle quota. Returns the job id.
pub async fn request_plan_regeneration(
  state: &AppState,
  identity: &dyn IdentityProvider,
  kind: PlanKind,
  language: Option<Language>,
  duration_days: Option<i64>,
) -> Result<String, CoachError> {
  let profile = current_profile(state, identity).await?;
  let language = language.unwrap_or(profile.preferred_language);

  let duration_days = match duration_days {
    Some(days) => days,
    None => onboarding::get_cycle_length_days(&state.db, state.config.limits.default_cycle_length_days).await?,
  };
  generator::validate_duration(duration_days)?;

  state.rate_gate.ensure_generation_quota(&profile.user_id, language).await?;

  state
    .queue
    .enqueue(&GenerationRequest {
      kind,
      user_id: profile.user_id,
      check_in_id: None,
      language,
      duration_days,
    })
    .await
}

pub async fn get_job_status(
  state: &AppState,
  identity: &dyn IdentityProvider,
  job_id: String,
) -> Result<JobStatus, CoachError> {
  let user_id = require_user(identity)?;
  if queue::job_user_id(&state.db, &job_id).await?.as_deref() != Some(user_id.as_str()) {
    return Err(queue::QueueError::NotFound(job_id).into());
  }
  state.queue.status(&job_id).await
}
