//! Check-in submission and history

use serde::Serialize;

use crate::check_in;
use crate::commands::current_profile;
use crate::error::CoachError;
use crate::generator::validate_duration;
use crate::i18n::{self, Language};
use crate::identity::{require_user, IdentityProvider};
use crate::models::{CheckIn, CheckInFields};
use crate::onboarding;
use crate::state::AppState;
use crate::workflow::{self, CheckInInput, RunStatus, WorkflowRun};

const HISTORY_LIMIT: i64 = 100;

/// What the client sees after submitting. A failed or slow generation is a
/// warning, not an error: the check-in itself was saved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
  pub run_id: String,
  pub status: RunStatus,
  pub check_in_id: Option<String>,
  pub meal_plan_id: Option<String>,
  pub workout_plan_id: Option<String>,
  pub warning: Option<String>,
}

impl SubmissionOutcome {
  fn from_run(run: WorkflowRun, language: Language) -> Self {
    let warning = match run.status {
      RunStatus::GenerationFailed => Some(i18n::generation_failed_warning(language).to_string()),
      RunStatus::TimedOut => Some(i18n::generation_timed_out_warning(language).to_string()),
      RunStatus::Running | RunStatus::PlansGenerated => None,
    };

    Self {
      run_id: run.id,
      status: run.status,
      check_in_id: run.output.check_in_id,
      meal_plan_id: run.output.meal_plan_id,
      workout_plan_id: run.output.workout_plan_id,
      warning,
    }
  }
}

/// Submit a check-in and regenerate both plans. Input is validated and rate
/// limits are enforced before anything is written.
///
/// `language` defaults to the profile's preferred language and
/// `duration_days` to the current coaching cycle length.
pub async fn submit_check_in(
  state: &AppState,
  identity: &dyn IdentityProvider,
  fields: CheckInFields,
  language: Option<Language>,
  duration_days: Option<i64>,
) -> Result<SubmissionOutcome, CoachError> {
  let profile = current_profile(state, identity).await?;
  let user_id = profile.user_id.clone();
  let language = language.unwrap_or(profile.preferred_language);

  if onboarding::get_assessment(&state.db, &user_id).await?.is_none() {
    return Err(CoachError::Precondition("assessment not completed".to_string()));
  }
  check_in::validate_fields(&fields)?;

  let duration_days = match duration_days {
    Some(days) => days,
    None => onboarding::get_cycle_length_days(&state.db, state.config.limits.default_cycle_length_days).await?,
  };
  validate_duration(duration_days)?;

  state.rate_gate.ensure_can_start(&user_id, language).await?;

  let run = state
    .workflow
    .start(&CheckInInput {
      user_id,
      fields,
      language,
      duration_days,
    })
    .await?;

  Ok(SubmissionOutcome::from_run(run, language))
}

pub async fn list_check_ins(state: &AppState, identity: &dyn IdentityProvider) -> Result<Vec<CheckIn>, CoachError> {
  let user_id = require_user(identity)?;
  check_in::list_check_ins(&state.db, &user_id, HISTORY_LIMIT).await
}

pub async fn get_check_in(
  state: &AppState,
  identity: &dyn IdentityProvider,
  check_in_id: String,
) -> Result<CheckIn, CoachError> {
  let user_id = require_user(identity)?;
  check_in::get_check_in(&state.db, &user_id, &check_in_id)
    .await?
    .ok_or_else(|| CoachError::NotFound(format!("check-in {}", check_in_id)))
}

pub async fn get_workflow_status(
  state: &AppState,
  identity: &dyn IdentityProvider,
  run_id: String,
) -> Result<WorkflowRun, CoachError> {
  let user_id = require_user(identity)?;
  workflow::get_run(&state.db, &run_id)
    .await?
    .filter(|run| run.user_id == user_id)
    .ok_or_else(|| CoachError::NotFound(format!("workflow run {}", run_id)))
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
