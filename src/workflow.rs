//! Durable check-in workflow
//!
//! record check-in -> enqueue meal + workout jobs -> poll both -> extract
//! plan ids -> push -> email fallback.
//!
//! Every step leaves a row in `workflow_steps`. A resumed run skips any step
//! that already has a row, so side effects happen at most once:
//! - database effects (check-in insert, job enqueue) commit in the same
//!   transaction as their step row
//! - external effects (push, email) claim their row first, then run
//! - polls record the terminal job status they observed
//!
//! A run that errors out (e.g. database unavailable) stays `running` and is
//! picked up again by [`CheckInWorkflow::resume_incomplete`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, Sqlite, SqlitePool};

use crate::check_in;
use crate::config::WorkflowConfig;
use crate::db::{from_millis, new_id, to_millis};
use crate::error::CoachError;
use crate::generator::GenerationRequest;
use crate::i18n::Language;
use crate::models::{CheckInFields, PlanKind};
use crate::notifier::{EmailOutcome, Notifier, PushOutcome};
use crate::queue::{self, JobStatus, WorkQueue};

pub const GENERATION_FAILED: &str = "AI plan generation failed in workpool";

const STEP_RECORD_CHECK_IN: &str = "record_check_in";
const STEP_NOTIFY_PUSH: &str = "notify_push";
const STEP_NOTIFY_EMAIL: &str = "notify_email";

fn enqueue_step(kind: PlanKind) -> &'static str {
  match kind {
    PlanKind::Meal => "enqueue_meal",
    PlanKind::Workout => "enqueue_workout",
  }
}

fn poll_step(kind: PlanKind) -> &'static str {
  match kind {
    PlanKind::Meal => "poll_meal",
    PlanKind::Workout => "poll_workout",
  }
}

/// ---------------------------------------------------------------------------
/// Run Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInInput {
  pub user_id: String,
  pub fields: CheckInFields,
  pub language: Language,
  pub duration_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  PlansGenerated,
  GenerationFailed,
  /// Jobs did not reach a terminal state within the poll budget
  TimedOut,
}

impl RunStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Running => "running",
      Self::PlansGenerated => "plans_generated",
      Self::GenerationFailed => "generation_failed",
      Self::TimedOut => "timed_out",
    }
  }

  fn parse(s: &str) -> Self {
    match s {
      "plans_generated" => Self::PlansGenerated,
      "generation_failed" => Self::GenerationFailed,
      "timed_out" => Self::TimedOut,
      _ => Self::Running,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
  pub check_in_id: Option<String>,
  pub meal_plan_id: Option<String>,
  pub workout_plan_id: Option<String>,
  pub push: Option<PushOutcome>,
  pub email: Option<EmailOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
  pub id: String,
  pub user_id: String,
  pub status: RunStatus,
  pub output: RunOutput,
  pub error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
}

/// ---------------------------------------------------------------------------
/// Run + Step Persistence
/// ---------------------------------------------------------------------------

pub async fn get_run(pool: &SqlitePool, run_id: &str) -> Result<Option<WorkflowRun>, CoachError> {
  let row = sqlx::query("SELECT * FROM workflow_runs WHERE id = ?1")
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

  let Some(row) = row else {
    return Ok(None);
  };

  let output_json: Option<String> = row.get("output_json");
  let output = match output_json {
    Some(json) => serde_json::from_str(&json)?,
    None => RunOutput::default(),
  };
  let finished_at: Option<i64> = row.get("finished_at");

  Ok(Some(WorkflowRun {
    id: row.get("id"),
    user_id: row.get("user_id"),
    status: RunStatus::parse(row.get("status")),
    output,
    error: row.get("error"),
    created_at: from_millis(row.get("created_at")),
    finished_at: finished_at.map(from_millis),
  }))
}

async fn load_input(pool: &SqlitePool, run_id: &str) -> Result<CheckInInput, CoachError> {
  let json: String = sqlx::query_scalar("SELECT input_json FROM workflow_runs WHERE id = ?1")
    .bind(run_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| CoachError::NotFound(format!("workflow run {}", run_id)))?;
  Ok(serde_json::from_str(&json)?)
}

/// Steps that have a row, with their recorded output (`None` while an
/// external step is claimed but not yet finished)
async fn load_steps(pool: &SqlitePool, run_id: &str) -> Result<HashMap<String, Option<Value>>, CoachError> {
  let rows = sqlx::query("SELECT step_name, output_json FROM workflow_steps WHERE run_id = ?1")
    .bind(run_id)
    .fetch_all(pool)
    .await?;

  rows
    .iter()
    .map(|row| {
      let name: String = row.get("step_name");
      let output: Option<String> = row.get("output_json");
      let value = output.map(|json| serde_json::from_str(&json)).transpose()?;
      Ok((name, value))
    })
    .collect()
}

/// Fails on conflict, so two drivers cannot both commit the same step
async fn record_step<'e, E>(executor: E, run_id: &str, step: &str, output: &Value) -> Result<(), CoachError>
where
  E: sqlx::Executor<'e, Database = Sqlite>,
{
  sqlx::query(
    "INSERT INTO workflow_steps (run_id, step_name, output_json, completed_at) VALUES (?1, ?2, ?3, ?4)",
  )
  .bind(run_id)
  .bind(step)
  .bind(serde_json::to_string(output)?)
  .bind(to_millis(Utc::now()))
  .execute(executor)
  .await?;
  Ok(())
}

/// `false` when the step was already claimed by an earlier attempt
async fn claim_step(pool: &SqlitePool, run_id: &str, step: &str) -> Result<bool, CoachError> {
  let result = sqlx::query(
    "INSERT OR IGNORE INTO workflow_steps (run_id, step_name, output_json, completed_at) VALUES (?1, ?2, NULL, ?3)",
  )
  .bind(run_id)
  .bind(step)
  .bind(to_millis(Utc::now()))
  .execute(pool)
  .await?;
  Ok(result.rows_affected() == 1)
}

async fn finish_claimed_step(pool: &SqlitePool, run_id: &str, step: &str, output: &Value) -> Result<(), CoachError> {
  sqlx::query("UPDATE workflow_steps SET output_json = ?1, completed_at = ?2 WHERE run_id = ?3 AND step_name = ?4")
    .bind(serde_json::to_string(output)?)
    .bind(to_millis(Utc::now()))
    .bind(run_id)
    .bind(step)
    .execute(pool)
    .await?;
  Ok(())
}

async fn finish_run(
  pool: &SqlitePool,
  run_id: &str,
  status: RunStatus,
  output: &RunOutput,
  error: Option<&str>,
) -> Result<(), CoachError> {
  sqlx::query(
    r#"
    UPDATE workflow_runs
    SET status = ?1, output_json = ?2, error = ?3, finished_at = ?4
    WHERE id = ?5 AND status = 'running'
    "#,
  )
  .bind(status.as_str())
  .bind(serde_json::to_string(output)?)
  .bind(error)
  .bind(to_millis(Utc::now()))
  .bind(run_id)
  .execute(pool)
  .await?;
  Ok(())
}

/// ---------------------------------------------------------------------------
/// Driver
/// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CheckInWorkflow {
  pool: SqlitePool,
  queue: Arc<WorkQueue>,
  notifier: Arc<Notifier>,
  config: WorkflowConfig,
}

impl CheckInWorkflow {
  pub fn new(pool: SqlitePool, queue: Arc<WorkQueue>, notifier: Arc<Notifier>, config: WorkflowConfig) -> Self {
    Self {
      pool,
      queue,
      notifier,
      config,
    }
  }

  /// Persist a new run without driving it
  pub async fn create_run(&self, input: &CheckInInput) -> Result<String, CoachError> {
    check_in::validate_fields(&input.fields)?;

    let run_id = new_id();
    sqlx::query(
      "INSERT INTO workflow_runs (id, user_id, input_json, status, created_at) VALUES (?1, ?2, ?3, 'running', ?4)",
    )
    .bind(&run_id)
    .bind(&input.user_id)
    .bind(serde_json::to_string(input)?)
    .bind(to_millis(Utc::now()))
    .execute(&self.pool)
    .await?;

    tracing::info!(run_id = %run_id, user_id = %input.user_id, "workflow started");
    Ok(run_id)
  }

  /// Create a run and drive it to a terminal state
  pub async fn start(&self, input: &CheckInInput) -> Result<WorkflowRun, CoachError> {
    let run_id = self.create_run(input).await?;
    self.resume(&run_id).await
  }

  /// Continue a run from its first incomplete step. Terminal runs are
  /// returned as they are.
  pub async fn resume(&self, run_id: &str) -> Result<WorkflowRun, CoachError> {
    let run = get_run(&self.pool, run_id)
      .await?
      .ok_or_else(|| CoachError::NotFound(format!("workflow run {}", run_id)))?;

    if run.status == RunStatus::Running {
      self.drive(run_id).await?;
    }

    get_run(&self.pool, run_id)
      .await?
      .ok_or_else(|| CoachError::NotFound(format!("workflow run {}", run_id)))
  }

  /// Resume every `running` run in the background. Returns their ids.
  pub async fn resume_incomplete(&self) -> Result<Vec<String>, CoachError> {
    let run_ids: Vec<String> =
      sqlx::query_scalar("SELECT id FROM workflow_runs WHERE status = 'running' ORDER BY created_at ASC")
        .fetch_all(&self.pool)
        .await?;

    for run_id in &run_ids {
      let workflow = self.clone();
      let run_id = run_id.clone();
      tokio::spawn(async move {
        if let Err(e) = workflow.resume(&run_id).await {
          tracing::error!(run_id = %run_id, error = %e, "workflow resume failed");
        }
      });
    }

    if !run_ids.is_empty() {
      tracing::info!(count = run_ids.len(), "resuming incomplete workflows");
    }
    Ok(run_ids)
  }

  async fn drive(&self, run_id: &str) -> Result<(), CoachError> {
    let input = load_input(&self.pool, run_id).await?;
    let user_id = input.user_id.as_str();

    let check_in_id = self.record_check_in(run_id, &input).await?;
    let mut output = RunOutput {
      check_in_id: Some(check_in_id.clone()),
      ..Default::default()
    };

    let meal_job = self.enqueue_job(run_id, PlanKind::Meal, &input, &check_in_id).await?;
    let workout_job = self.enqueue_job(run_id, PlanKind::Workout, &input, &check_in_id).await?;

    let Some((meal, workout)) = self.poll_jobs(run_id, &meal_job, &workout_job).await? else {
      tracing::error!(run_id, user_id, "plan generation timed out");
      finish_run(
        &self.pool,
        run_id,
        RunStatus::TimedOut,
        &output,
        Some("plan generation did not finish in time"),
      )
      .await?;
      return Ok(());
    };

    output.meal_plan_id = meal.plan_id();
    output.workout_plan_id = workout.plan_id();

    let (Some(meal_plan_id), Some(workout_plan_id)) = (output.meal_plan_id.clone(), output.workout_plan_id.clone())
    else {
      tracing::error!(
        run_id,
        user_id,
        meal_error = meal.error.as_deref().unwrap_or(""),
        workout_error = workout.error.as_deref().unwrap_or(""),
        "{}",
        GENERATION_FAILED
      );
      finish_run(&self.pool, run_id, RunStatus::GenerationFailed, &output, Some(GENERATION_FAILED)).await?;
      return Ok(());
    };

    output.push = self.notify_push(run_id, user_id, &meal_plan_id, &workout_plan_id).await?;
    output.email = self.notify_email(run_id, user_id).await?;

    finish_run(&self.pool, run_id, RunStatus::PlansGenerated, &output, None).await?;
    tracing::info!(run_id, user_id, meal_plan_id = %meal_plan_id, workout_plan_id = %workout_plan_id, "workflow complete");
    Ok(())
  }

  /// Step: insert the check-in, once
  pub(crate) async fn record_check_in(&self, run_id: &str, input: &CheckInInput) -> Result<String, CoachError> {
    let steps = load_steps(&self.pool, run_id).await?;
    if let Some(Some(Value::String(id))) = steps.get(STEP_RECORD_CHECK_IN) {
      return Ok(id.clone());
    }

    let mut tx = self.pool.begin().await?;
    let id = check_in::insert_check_in(&mut *tx, &input.user_id, &input.fields, Utc::now()).await?;
    record_step(&mut *tx, run_id, STEP_RECORD_CHECK_IN, &Value::String(id.clone())).await?;
    tx.commit().await?;

    tracing::info!(run_id, user_id = %input.user_id, check_in_id = %id, "check-in recorded");
    Ok(id)
  }

  /// Step: enqueue one generation job, once. Dispatch is repeated on resume
  /// in case the process died between commit and dispatch.
  async fn enqueue_job(
    &self,
    run_id: &str,
    kind: PlanKind,
    input: &CheckInInput,
    check_in_id: &str,
  ) -> Result<String, CoachError> {
    let step = enqueue_step(kind);
    let steps = load_steps(&self.pool, run_id).await?;

    let job_id = match steps.get(step) {
      Some(Some(Value::String(id))) => id.clone(),
      _ => {
        let args = GenerationRequest {
          kind,
          user_id: input.user_id.clone(),
          check_in_id: Some(check_in_id.to_string()),
          language: input.language,
          duration_days: input.duration_days,
        };

        let mut tx = self.pool.begin().await?;
        let id = queue::enqueue_in_tx(&mut *tx, &args).await?;
        record_step(&mut *tx, run_id, step, &Value::String(id.clone())).await?;
        tx.commit().await?;

        tracing::info!(run_id, kind = %kind, job_id = %id, "generation job enqueued");
        id
      }
    };

    self.queue.dispatch(&job_id)?;
    Ok(job_id)
  }

  /// Step: wait for both jobs to reach a terminal state. `None` when the
  /// poll budget runs out first.
  async fn poll_jobs(
    &self,
    run_id: &str,
    meal_job: &str,
    workout_job: &str,
  ) -> Result<Option<(JobStatus, JobStatus)>, CoachError> {
    let steps = load_steps(&self.pool, run_id).await?;
    let recorded = |kind: PlanKind| -> Result<Option<JobStatus>, CoachError> {
      match steps.get(poll_step(kind)) {
        Some(Some(value)) => Ok(Some(serde_json::from_value(value.clone())?)),
        _ => Ok(None),
      }
    };
    let mut meal = recorded(PlanKind::Meal)?;
    let mut workout = recorded(PlanKind::Workout)?;

    let mut attempts = 0;
    loop {
      for (kind, job_id, slot) in [
        (PlanKind::Meal, meal_job, &mut meal),
        (PlanKind::Workout, workout_job, &mut workout),
      ] {
        if slot.is_some() {
          continue;
        }
        let status = self.queue.status(job_id).await?;
        if status.state.is_terminal() {
          record_step(&self.pool, run_id, poll_step(kind), &serde_json::to_value(&status)?).await?;
          tracing::info!(run_id, kind = %kind, job_id, state = status.state.as_str(), "generation job done");
          *slot = Some(status);
        }
      }

      if let (Some(m), Some(w)) = (&meal, &workout) {
        return Ok(Some((m.clone(), w.clone())));
      }

      attempts += 1;
      if attempts >= self.config.max_poll_attempts {
        return Ok(None);
      }
      tokio::time::sleep(self.config.poll_interval).await;
    }
  }

  /// Step: push, at most once. Delivery problems are logged, never fatal.
  async fn notify_push(
    &self,
    run_id: &str,
    user_id: &str,
    meal_plan_id: &str,
    workout_plan_id: &str,
  ) -> Result<Option<PushOutcome>, CoachError> {
    if !claim_step(&self.pool, run_id, STEP_NOTIFY_PUSH).await? {
      return self.claimed_outcome(run_id, STEP_NOTIFY_PUSH).await;
    }

    let outcome = match self.notifier.notify_plans_ready(user_id, meal_plan_id, workout_plan_id).await {
      Ok(outcome) => Some(outcome),
      Err(e) => {
        tracing::warn!(run_id, user_id, error = %e, "push notification step failed");
        None
      }
    };
    finish_claimed_step(&self.pool, run_id, STEP_NOTIFY_PUSH, &serde_json::to_value(outcome)?).await?;
    Ok(outcome)
  }

  /// Step: email fallback, at most once. No-ops inside the notifier when the
  /// user has an active push subscription.
  async fn notify_email(&self, run_id: &str, user_id: &str) -> Result<Option<EmailOutcome>, CoachError> {
    if !claim_step(&self.pool, run_id, STEP_NOTIFY_EMAIL).await? {
      return self.claimed_outcome(run_id, STEP_NOTIFY_EMAIL).await;
    }

    let outcome = match self.notifier.send_fallback_email(user_id).await {
      Ok(outcome) => Some(outcome),
      Err(e) => {
        tracing::warn!(run_id, user_id, error = %e, "email fallback step failed");
        None
      }
    };
    finish_claimed_step(&self.pool, run_id, STEP_NOTIFY_EMAIL, &serde_json::to_value(outcome)?).await?;
    Ok(outcome)
  }

  async fn claimed_outcome<T: serde::de::DeserializeOwned>(
    &self,
    run_id: &str,
    step: &str,
  ) -> Result<Option<T>, CoachError> {
    let steps = load_steps(&self.pool, run_id).await?;
    match steps.get(step) {
      Some(Some(value)) => Ok(serde_json::from_value(value.clone())?),
      _ => Ok(None),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
