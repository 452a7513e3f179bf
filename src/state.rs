//! Shared application state and its wiring

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::db;
use crate::error::CoachError;
use crate::generator::PlanGenerator;
use crate::knowledge::SqliteKnowledgeBase;
use crate::llm::{ClaudeClient, TextGenerator};
use crate::notifier::{EmailSender, HttpPushSender, Notifier, PushSender, SmtpEmailSender};
use crate::queue::WorkQueue;
use crate::rate_gate::{RateGate, SqliteRateLimiter};
use crate::storage::{BlobStore, HttpBlobStore};
use crate::workflow::CheckInWorkflow;

/// External services the core talks to
pub struct Collaborators {
  pub llm: Arc<dyn TextGenerator>,
  pub push: Arc<dyn PushSender>,
  pub email: Option<Arc<dyn EmailSender>>,
  pub blobs: Option<Arc<dyn BlobStore>>,
}

impl Collaborators {
  pub fn from_config(config: &AppConfig) -> Result<Self, CoachError> {
    let llm_config = config
      .llm
      .clone()
      .ok_or_else(|| CoachError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;

    Ok(Self {
      llm: Arc::new(ClaudeClient::new(llm_config)?),
      push: Arc::new(HttpPushSender::new(config.push_timeout)?),
      email: config
        .smtp
        .clone()
        .map(|smtp| Arc::new(SmtpEmailSender::new(smtp)) as Arc<dyn EmailSender>),
      blobs: config
        .blob_gateway_url
        .clone()
        .map(|url| Arc::new(HttpBlobStore::new(url)) as Arc<dyn BlobStore>),
    })
  }
}

pub struct AppState {
  pub db: SqlitePool,
  pub config: AppConfig,
  pub rate_gate: RateGate,
  pub queue: Arc<WorkQueue>,
  pub workflow: CheckInWorkflow,
  pub knowledge: Arc<SqliteKnowledgeBase>,
  pub blobs: Option<Arc<dyn BlobStore>>,
}

impl AppState {
  /// Open the database, run migrations and start the work queue
  pub async fn bootstrap(config: AppConfig) -> Result<Self, CoachError> {
    let pool = db::initialize_db(&config.database_url).await?;
    let collaborators = Collaborators::from_config(&config)?;
    Self::build(pool, config, collaborators).await
  }

  pub async fn build(
    pool: SqlitePool,
    config: AppConfig,
    collaborators: Collaborators,
  ) -> Result<Self, CoachError> {
    let knowledge = Arc::new(SqliteKnowledgeBase::new(pool.clone()));
    let generator = Arc::new(PlanGenerator::new(
      pool.clone(),
      collaborators.llm,
      knowledge.clone(),
    ));
    let queue = Arc::new(WorkQueue::start(pool.clone(), generator, config.queue.clone()).await?);
    let notifier = Arc::new(Notifier::new(
      pool.clone(),
      collaborators.push,
      collaborators.email,
    ));

    let rate_gate = RateGate::new(
      pool.clone(),
      Arc::new(SqliteRateLimiter::new(pool.clone())),
      config.limits.clone(),
    );
    let workflow = CheckInWorkflow::new(pool.clone(), queue.clone(), notifier, config.workflow.clone());

    Ok(Self {
      db: pool,
      config,
      rate_gate,
      queue,
      workflow,
      knowledge,
      blobs: collaborators.blobs,
    })
  }

  pub async fn shutdown(&self) {
    self.queue.shutdown().await;
    self.db.close().await;
  }
}
