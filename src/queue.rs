//! Bounded work queue for plan generation jobs
//!
//! Jobs are rows in `queue_jobs`; the in-process side is a single FIFO
//! dispatcher that hands each job id to a worker task once one of the
//! `max_parallelism` semaphore permits is free. The permit is the only
//! concurrency control, and it is process-wide: no per-user fairness.
//!
//! States only move forward: pending -> running -> finished | failed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, Sqlite, SqlitePool};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::QueueConfig;
use crate::db::{new_id, to_millis};
use crate::error::CoachError;
use crate::generator::{GenerationRequest, PlanGenerator};

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum QueueError {
  #[error("Job not found: {0}")]
  NotFound(String),

  #[error("Work queue is shut down")]
  ShutDown,

  #[error("Job timed out after {0}s")]
  TimedOut(u64),

  #[error("Job cancelled")]
  Cancelled,
}

/// ---------------------------------------------------------------------------
/// Job Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
  Pending,
  Running,
  Finished,
  Failed,
}

impl JobState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Running => "running",
      Self::Finished => "finished",
      Self::Failed => "failed",
    }
  }

  fn parse(s: &str) -> Self {
    match s {
      "running" => Self::Running,
      "finished" => Self::Finished,
      "failed" => Self::Failed,
      _ => Self::Pending,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Finished | Self::Failed)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
  pub id: String,
  pub state: JobState,
  /// Present only once finished
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl JobStatus {
  /// `planId` from a finished generation job's result
  pub fn plan_id(&self) -> Option<String> {
    self
      .result
      .as_ref()
      .and_then(|r| r.get("planId"))
      .and_then(Value::as_str)
      .map(str::to_string)
  }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
  async fn run(&self, args: GenerationRequest) -> Result<Value, CoachError>;
}

#[async_trait]
impl JobHandler for PlanGenerator {
  async fn run(&self, args: GenerationRequest) -> Result<Value, CoachError> {
    let plan_id = self.generate(&args).await?;
    Ok(serde_json::json!({ "planId": plan_id }))
  }
}

/// ---------------------------------------------------------------------------
/// Persistence
/// ---------------------------------------------------------------------------

/// Insert a pending job through any executor. The job does not run until
/// [`WorkQueue::dispatch`] is called for it (or the next start-up recovery).
pub async fn enqueue_in_tx<'e, E>(executor: E, args: &GenerationRequest) -> Result<String, CoachError>
where
  E: sqlx::Executor<'e, Database = Sqlite>,
{
  let id = new_id();

  sqlx::query(
    r#"
    INSERT INTO queue_jobs (id, seq, args_json, status, created_at)
    VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM queue_jobs), ?2, 'pending', ?3)
    "#,
  )
  .bind(&id)
  .bind(serde_json::to_string(args)?)
  .bind(to_millis(Utc::now()))
  .execute(executor)
  .await?;

  Ok(id)
}

pub async fn job_status(pool: &SqlitePool, job_id: &str) -> Result<JobStatus, CoachError> {
  let row = sqlx::query("SELECT id, status, result_json, error FROM queue_jobs WHERE id = ?1")
    .bind(job_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

  let state = JobState::parse(row.get("status"));
  let result_json: Option<String> = row.get("result_json");
  let result = match (state, result_json) {
    (JobState::Finished, Some(json)) => Some(serde_json::from_str(&json)?),
    _ => None,
  };

  Ok(JobStatus {
    id: row.get("id"),
    state,
    result,
    error: row.get("error"),
  })
}

/// User the job generates for, `None` for unknown jobs
pub async fn job_user_id(pool: &SqlitePool, job_id: &str) -> Result<Option<String>, CoachError> {
  let args_json: Option<String> = sqlx::query_scalar("SELECT args_json FROM queue_jobs WHERE id = ?1")
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

  match args_json {
    Some(json) => Ok(Some(serde_json::from_str::<GenerationRequest>(&json)?.user_id)),
    None => Ok(None),
  }
}

/// Claim a pending job. `false` when another worker got there first or the
/// job is no longer pending.
async fn claim(pool: &SqlitePool, job_id: &str) -> Result<bool, CoachError> {
  let result = sqlx::query(
    "UPDATE queue_jobs SET status = 'running', started_at = ?1 WHERE id = ?2 AND status = 'pending'",
  )
  .bind(to_millis(Utc::now()))
  .bind(job_id)
  .execute(pool)
  .await?;

  Ok(result.rows_affected() == 1)
}

async fn load_args(pool: &SqlitePool, job_id: &str) -> Result<GenerationRequest, CoachError> {
  let args_json: String = sqlx::query_scalar("SELECT args_json FROM queue_jobs WHERE id = ?1")
    .bind(job_id)
    .fetch_one(pool)
    .await?;
  Ok(serde_json::from_str(&args_json)?)
}

async fn complete(
  pool: &SqlitePool,
  job_id: &str,
  outcome: &Result<Value, CoachError>,
) -> Result<(), CoachError> {
  let (status, result_json, error) = match outcome {
    Ok(value) => ("finished", Some(serde_json::to_string(value)?), None),
    Err(e) => ("failed", None, Some(e.to_string())),
  };

  sqlx::query(
    r#"
    UPDATE queue_jobs
    SET status = ?1, result_json = ?2, error = ?3, finished_at = ?4
    WHERE id = ?5 AND status = 'running'
    "#,
  )
  .bind(status)
  .bind(result_json)
  .bind(error)
  .bind(to_millis(Utc::now()))
  .bind(job_id)
  .execute(pool)
  .await?;

  Ok(())
}

/// ---------------------------------------------------------------------------
/// Work Queue
/// ---------------------------------------------------------------------------

struct Worker {
  pool: SqlitePool,
  handler: Arc<dyn JobHandler>,
  config: QueueConfig,
  cancel: CancellationToken,
}

impl Worker {
  async fn run_job(&self, job_id: String) {
    if let Err(e) = self.try_run_job(&job_id).await {
      tracing::error!(job_id = %job_id, error = %e, "job bookkeeping failed");
    }
  }

  async fn try_run_job(&self, job_id: &str) -> Result<(), CoachError> {
    if !claim(&self.pool, job_id).await? {
      tracing::debug!(job_id, "job already claimed, skipping");
      return Ok(());
    }

    let outcome = match load_args(&self.pool, job_id).await {
      Ok(args) => {
        tracing::info!(job_id, user_id = %args.user_id, kind = %args.kind, "job started");
        let timeout = self.config.job_timeout;
        tokio::select! {
          _ = self.cancel.cancelled() => Err(CoachError::Queue(QueueError::Cancelled)),
          result = tokio::time::timeout(timeout, self.handler.run(args)) => match result {
            Ok(outcome) => outcome,
            Err(_) => Err(CoachError::Queue(QueueError::TimedOut(timeout.as_secs()))),
          },
        }
      }
      Err(e) => Err(e),
    };

    match &outcome {
      Ok(_) => tracing::info!(job_id, "job finished"),
      Err(e) => tracing::error!(job_id, error = %e, "job failed"),
    }

    complete(&self.pool, job_id, &outcome).await
  }
}

pub struct WorkQueue {
  pool: SqlitePool,
  sender: mpsc::UnboundedSender<String>,
  cancel: CancellationToken,
  tracker: TaskTracker,
}

impl WorkQueue {
  /// Start the dispatcher. Jobs left `running` by a previous process are
  /// failed; `pending` ones are re-dispatched in creation order.
  ///
  /// Exactly one process may own the queue for a database. Starting a
  /// second queue against the same database fails the first one's
  /// in-flight jobs.
  pub async fn start(
    pool: SqlitePool,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
  ) -> Result<Self, CoachError> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let semaphore = Arc::new(Semaphore::new(config.max_parallelism));

    tracing::info!(max_parallelism = config.max_parallelism, "work queue started");

    let worker = Arc::new(Worker {
      pool: pool.clone(),
      handler,
      config,
      cancel: cancel.clone(),
    });

    let dispatch_cancel = cancel.clone();
    let dispatch_tracker = tracker.clone();
    tracker.spawn(async move {
      loop {
        let job_id = tokio::select! {
          _ = dispatch_cancel.cancelled() => break,
          next = receiver.recv() => match next {
            Some(id) => id,
            None => break,
          },
        };

        // Waiting here keeps admission FIFO
        let permit = tokio::select! {
          _ = dispatch_cancel.cancelled() => break,
          permit = semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => break,
          },
        };

        let worker = worker.clone();
        dispatch_tracker.spawn(async move {
          let _permit = permit;
          worker.run_job(job_id).await;
        });
      }
      tracing::info!("work queue dispatcher stopped");
    });

    let queue = Self {
      pool,
      sender,
      cancel,
      tracker,
    };
    queue.recover().await?;
    Ok(queue)
  }

  async fn recover(&self) -> Result<(), CoachError> {
    let interrupted = sqlx::query(
      r#"
      UPDATE queue_jobs
      SET status = 'failed', error = 'interrupted by restart', finished_at = ?1
      WHERE status = 'running'
      "#,
    )
    .bind(to_millis(Utc::now()))
    .execute(&self.pool)
    .await?
    .rows_affected();

    let pending: Vec<String> =
      sqlx::query_scalar("SELECT id FROM queue_jobs WHERE status = 'pending' ORDER BY seq ASC")
        .fetch_all(&self.pool)
        .await?;

    if interrupted > 0 || !pending.is_empty() {
      tracing::info!(interrupted, pending = pending.len(), "work queue recovered");
    }

    for job_id in pending {
      self.dispatch(&job_id)?;
    }
    Ok(())
  }

  /// Hand a committed pending job to the dispatcher. Dispatching the same
  /// job twice is harmless: only one worker can claim it.
  pub fn dispatch(&self, job_id: &str) -> Result<(), CoachError> {
    if self.cancel.is_cancelled() {
      return Err(QueueError::ShutDown.into());
    }
    self
      .sender
      .send(job_id.to_string())
      .map_err(|_| QueueError::ShutDown)?;
    Ok(())
  }

  pub async fn enqueue(&self, args: &GenerationRequest) -> Result<String, CoachError> {
    if self.cancel.is_cancelled() {
      return Err(QueueError::ShutDown.into());
    }
    let job_id = enqueue_in_tx(&self.pool, args).await?;
    tracing::info!(job_id = %job_id, user_id = %args.user_id, kind = %args.kind, "job enqueued");
    self.dispatch(&job_id)?;
    Ok(job_id)
  }

  pub async fn status(&self, job_id: &str) -> Result<JobStatus, CoachError> {
    job_status(&self.pool, job_id).await
  }

  /// Cancel in-flight jobs and wait for every task to stop
  pub async fn shutdown(&self) {
    self.cancel.cancel();
    self.tracker.close();
    self.tracker.wait().await;
    tracing::info!("work queue shut down");
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::i18n::Language;
  use crate::models::PlanKind;
  use crate::test_utils::{setup_test_db, teardown_test_db, wait_for_job};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;

  fn args(user_id: &str) -> GenerationRequest {
    GenerationRequest {
      kind: PlanKind::Meal,
      user_id: user_id.to_string(),
      check_in_id: None,
      language: Language::En,
      duration_days: 14,
    }
  }

  fn config(max_parallelism: usize) -> QueueConfig {
    QueueConfig {
      max_parallelism,
      job_timeout: Duration::from_secs(5),
    }
  }

  /// Sleeps, recording the peak number of overlapping runs and start order
  #[derive(Default)]
  struct TrackingHandler {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
    delay: Duration,
  }

  #[async_trait]
  impl JobHandler for TrackingHandler {
    async fn run(&self, args: GenerationRequest) -> Result<Value, CoachError> {
      self.started.lock().unwrap().push(args.user_id.clone());
      let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(self.delay).await;
      self.active.fetch_sub(1, Ordering::SeqCst);
      Ok(serde_json::json!({ "planId": format!("plan-{}", args.user_id) }))
    }
  }

  #[tokio::test]
  async fn test_concurrency_cap_never_exceeded() {
    let pool = setup_test_db().await;
    let handler = Arc::new(TrackingHandler {
      delay: Duration::from_millis(40),
      ..Default::default()
    });
    let queue = WorkQueue::start(pool.clone(), handler.clone(), config(3)).await.unwrap();

    let mut ids = vec![];
    for i in 0..10 {
      ids.push(queue.enqueue(&args(&format!("user-{}", i))).await.unwrap());
    }
    for id in &ids {
      let status = wait_for_job(&queue, id).await;
      assert_eq!(status.state, JobState::Finished);
    }

    assert!(handler.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(handler.started.lock().unwrap().len(), 10);

    queue.shutdown().await;
    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_admission_is_fifo() {
    let pool = setup_test_db().await;
    let handler = Arc::new(TrackingHandler {
      delay: Duration::from_millis(5),
      ..Default::default()
    });
    let queue = WorkQueue::start(pool.clone(), handler.clone(), config(1)).await.unwrap();

    let mut ids = vec![];
    for name in ["a", "b", "c", "d"] {
      ids.push(queue.enqueue(&args(name)).await.unwrap());
    }
    for id in &ids {
      wait_for_job(&queue, id).await;
    }

    assert_eq!(*handler.started.lock().unwrap(), vec!["a", "b", "c", "d"]);

    queue.shutdown().await;
    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_result_only_when_finished() {
    let pool = setup_test_db().await;
    let queue = WorkQueue::start(pool.clone(), Arc::new(TrackingHandler::default()), config(2))
      .await
      .unwrap();

    let id = queue.enqueue(&args("user-1")).await.unwrap();
    let status = wait_for_job(&queue, &id).await;
    assert_eq!(status.plan_id().as_deref(), Some("plan-user-1"));
    assert!(status.error.is_none());

    let missing = queue.status("nope").await.unwrap_err();
    assert!(matches!(missing, CoachError::Queue(QueueError::NotFound(_))));

    queue.shutdown().await;
    teardown_test_db(pool).await;
  }

  struct FailingHandler;

  #[async_trait]
  impl JobHandler for FailingHandler {
    async fn run(&self, _args: GenerationRequest) -> Result<Value, CoachError> {
      Err(CoachError::Precondition("assessment not completed".to_string()))
    }
  }

  #[tokio::test]
  async fn test_handler_error_fails_job() {
    let pool = setup_test_db().await;
    let queue = WorkQueue::start(pool.clone(), Arc::new(FailingHandler), config(2)).await.unwrap();

    let id = queue.enqueue(&args("user-1")).await.unwrap();
    let status = wait_for_job(&queue, &id).await;
    assert_eq!(status.state, JobState::Failed);
    assert!(status.result.is_none());
    assert!(status.error.unwrap().contains("assessment not completed"));

    queue.shutdown().await;
    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_job_timeout() {
    let pool = setup_test_db().await;
    let handler = Arc::new(TrackingHandler {
      delay: Duration::from_secs(10),
      ..Default::default()
    });
    let queue = WorkQueue::start(
      pool.clone(),
      handler,
      QueueConfig {
        max_parallelism: 1,
        job_timeout: Duration::from_millis(30),
      },
    )
    .await
    .unwrap();

    let id = queue.enqueue(&args("user-1")).await.unwrap();
    let status = wait_for_job(&queue, &id).await;
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("timed out"));

    queue.shutdown().await;
    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_startup_recovery() {
    let pool = setup_test_db().await;

    // Left behind by a previous process
    let interrupted = enqueue_in_tx(&pool, &args("crashed")).await.unwrap();
    sqlx::query("UPDATE queue_jobs SET status = 'running' WHERE id = ?1")
      .bind(&interrupted)
      .execute(&pool)
      .await
      .unwrap();
    let waiting = enqueue_in_tx(&pool, &args("waiting")).await.unwrap();

    let queue = WorkQueue::start(pool.clone(), Arc::new(TrackingHandler::default()), config(2))
      .await
      .unwrap();

    let status = queue.status(&interrupted).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(wait_for_job(&queue, &waiting).await.state, JobState::Finished);

    queue.shutdown().await;
    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_shutdown_cancels_in_flight_jobs() {
    let pool = setup_test_db().await;
    let handler = Arc::new(TrackingHandler {
      delay: Duration::from_secs(30),
      ..Default::default()
    });
    let queue = WorkQueue::start(pool.clone(), handler.clone(), config(1)).await.unwrap();

    let id = queue.enqueue(&args("user-1")).await.unwrap();
    while handler.started.lock().unwrap().is_empty() {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }

    queue.shutdown().await;

    let status = job_status(&pool, &id).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.error.as_deref(), Some("Work queue error: Job cancelled"));
    assert!(matches!(
      queue.enqueue(&args("user-2")).await,
      Err(CoachError::Queue(QueueError::ShutDown))
    ));

    teardown_test_db(pool).await;
  }
}
