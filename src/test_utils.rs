//! Test utilities and helpers for unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Mock data factories and seeders
//! - Scripted fakes for the AI, retrieval, push and email collaborators

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::config::{AppConfig, WorkflowConfig};
use crate::db::{new_id, to_millis};
use crate::error::CoachError;
use crate::i18n::Language;
use crate::knowledge::KnowledgeBase;
use crate::llm::{GenerationOptions, LlmError, TextGenerator};
use crate::models::{
  Assessment, CheckIn, CheckInFields, CoachingStatus, ExperienceLevel, Measurements, Plan, PlanContent, PlanKind,
  Profile, Role,
};
use crate::notifier::{EmailSender, NotifyError, PushMessage, PushSender, PushSubscription};
use crate::onboarding::{self, ProfileInput};
use crate::queue::{JobStatus, WorkQueue};
use crate::state::{AppState, Collaborators};

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  // Run migrations
  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// `COUNT(*)` over a table, optionally with a trailing WHERE clause
pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
  sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
    .fetch_one(pool)
    .await
    .expect("Failed to count rows")
}

/// Profile plus assessment, enough for plan generation
pub async fn seed_onboarded_user(pool: &SqlitePool, user_id: &str) {
  onboarding::upsert_profile(
    pool,
    user_id,
    &ProfileInput {
      display_name: Some("Test Client".to_string()),
      email: Some(format!("{}@example.com", user_id)),
      preferred_language: Language::En,
      coaching_status: CoachingStatus::Active,
    },
  )
  .await
  .expect("Failed to seed profile");

  onboarding::upsert_assessment(pool, user_id, &mock_assessment())
    .await
    .expect("Failed to seed assessment");
}

/// Insert a structured plan with an explicit creation time. Returns its id.
pub async fn seed_plan(pool: &SqlitePool, kind: PlanKind, user_id: &str, created_at: DateTime<Utc>) -> String {
  let id = new_id();
  let start = created_at.date_naive();

  sqlx::query(&format!(
    r#"
    INSERT INTO {} (id, user_id, language, start_date, end_date, content_json, parse_error, raw_text, created_at)
    VALUES (?1, ?2, 'en', ?3, ?4, '{{"days": []}}', 0, '{{"days": []}}', ?5)
    "#,
    kind.table()
  ))
  .bind(&id)
  .bind(user_id)
  .bind(start)
  .bind(start + Duration::days(14))
  .bind(to_millis(created_at))
  .execute(pool)
  .await
  .expect("Failed to seed plan");

  id
}

/// ---------------------------------------------------------------------------
/// Mock Data Factories
/// ---------------------------------------------------------------------------

pub fn datetime_days_ago(days: i64) -> DateTime<Utc> {
  Utc::now() - Duration::days(days)
}

pub fn mock_assessment() -> Assessment {
  Assessment {
    goals: "Lose fat and build strength".to_string(),
    experience_level: ExperienceLevel::Beginner,
    age: Some(32),
    gender: Some("female".to_string()),
    height_cm: Some(168.0),
    weight_kg: Some(82.0),
    target_weight_kg: Some(72.0),
    activity_level: Some("lightly active".to_string()),
    dietary_preferences: vec!["high protein".to_string()],
    allergies: vec!["peanuts".to_string()],
    dietary_restrictions: vec!["halal".to_string()],
    equipment: vec!["dumbbells".to_string(), "resistance bands".to_string()],
    training_days_per_week: Some(4),
    session_minutes: Some(45),
    medical_notes: None,
  }
}

/// Typical mid-cycle check-in
pub fn mock_check_in_fields() -> CheckInFields {
  CheckInFields {
    weight: Some(80.0),
    measurements: Measurements::default(),
    workout_performance: "Completed all sessions, squats felt heavy".to_string(),
    energy_level: 7,
    sleep_quality: 6,
    dietary_adherence: 8,
    notes: None,
    photo_refs: vec![],
  }
}

pub fn mock_check_in(user_id: &str) -> CheckIn {
  CheckIn {
    id: new_id(),
    user_id: user_id.to_string(),
    fields: mock_check_in_fields(),
    created_at: Utc::now(),
  }
}

pub fn mock_profile(user_id: &str) -> Profile {
  Profile {
    user_id: user_id.to_string(),
    display_name: Some("Test Client".to_string()),
    email: Some(format!("{}@example.com", user_id)),
    preferred_language: Language::En,
    coaching_status: CoachingStatus::Active,
    role: Role::Client,
    updated_at: Utc::now(),
  }
}

pub fn mock_plan(id: &str, start_date: NaiveDate, end_date: NaiveDate) -> Plan {
  Plan {
    id: id.to_string(),
    kind: PlanKind::Meal,
    user_id: "user-1".to_string(),
    check_in_id: None,
    language: Language::En,
    start_date,
    end_date,
    content: PlanContent::Structured(serde_json::json!({"days": []})),
    raw_text: r#"{"days": []}"#.to_string(),
    stream_handle: None,
    created_at: Utc::now(),
  }
}

/// ---------------------------------------------------------------------------
/// Collaborator Fakes
/// ---------------------------------------------------------------------------

/// Returns a fixed response (or error) and records every user prompt
pub struct ScriptedGenerator {
  response: Option<String>,
  delay: StdDuration,
  prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
  pub fn always(response: &str) -> Self {
    Self {
      response: Some(response.to_string()),
      delay: StdDuration::ZERO,
      prompts: Mutex::new(vec![]),
    }
  }

  pub fn failing() -> Self {
    Self {
      response: None,
      delay: StdDuration::ZERO,
      prompts: Mutex::new(vec![]),
    }
  }

  pub fn with_delay(mut self, delay: StdDuration) -> Self {
    self.delay = delay;
    self
  }

  pub fn user_prompts(&self) -> Vec<String> {
    self.prompts.lock().unwrap().clone()
  }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
  async fn generate(&self, _system: &str, user: &str, _options: GenerationOptions) -> Result<String, LlmError> {
    self.prompts.lock().unwrap().push(user.to_string());
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    self
      .response
      .clone()
      .ok_or_else(|| LlmError::Unavailable("scripted failure".to_string()))
  }
}

pub struct StaticKnowledge {
  passages: Vec<String>,
}

impl StaticKnowledge {
  pub fn new(passages: Vec<&str>) -> Self {
    Self {
      passages: passages.into_iter().map(str::to_string).collect(),
    }
  }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledge {
  async fn search(&self, _query: &str, limit: usize) -> Result<Vec<String>, CoachError> {
    Ok(self.passages.iter().take(limit).cloned().collect())
  }
}

pub struct FailingKnowledge;

#[async_trait]
impl KnowledgeBase for FailingKnowledge {
  async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<String>, CoachError> {
    Err(CoachError::Storage("index unavailable".to_string()))
  }
}

#[derive(Default)]
pub struct RecordingPush {
  sent: Mutex<Vec<(PushSubscription, PushMessage)>>,
}

impl RecordingPush {
  pub fn sent(&self) -> Vec<(PushSubscription, PushMessage)> {
    self.sent.lock().unwrap().clone()
  }
}

#[async_trait]
impl PushSender for RecordingPush {
  async fn send_push(&self, subscription: &PushSubscription, message: &PushMessage) -> Result<(), NotifyError> {
    self
      .sent
      .lock()
      .unwrap()
      .push((subscription.clone(), message.clone()));
    Ok(())
  }
}

/// Records (to, subject, body)
#[derive(Default)]
pub struct RecordingEmail {
  sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingEmail {
  pub fn sent(&self) -> Vec<(String, String, String)> {
    self.sent.lock().unwrap().clone()
  }
}

#[async_trait]
impl EmailSender for RecordingEmail {
  async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
    self
      .sent
      .lock()
      .unwrap()
      .push((to.to_string(), subject.to_string(), body.to_string()));
    Ok(())
  }
}

/// ---------------------------------------------------------------------------
/// Application State
/// ---------------------------------------------------------------------------

pub struct TestState {
  pub state: AppState,
  pub push: Arc<RecordingPush>,
  pub email: Arc<RecordingEmail>,
}

/// Full application state over an in-memory database with fast polling
pub async fn test_state(llm: ScriptedGenerator) -> TestState {
  let pool = setup_test_db().await;
  let push = Arc::new(RecordingPush::default());
  let email = Arc::new(RecordingEmail::default());

  let config = AppConfig {
    database_url: "sqlite::memory:".to_string(),
    workflow: WorkflowConfig {
      poll_interval: StdDuration::from_millis(5),
      max_poll_attempts: 2000,
    },
    ..AppConfig::default()
  };

  let state = AppState::build(
    pool,
    config,
    Collaborators {
      llm: Arc::new(llm),
      push: push.clone(),
      email: Some(email.clone()),
      blobs: None,
    },
  )
  .await
  .expect("Failed to build app state");

  TestState { state, push, email }
}

pub async fn teardown_test_state(t: TestState) {
  t.state.shutdown().await;
}

/// Poll a job until it reaches a terminal state (5s cap)
pub async fn wait_for_job(queue: &WorkQueue, job_id: &str) -> JobStatus {
  for _ in 0..1000 {
    let status = queue.status(job_id).await.expect("Failed to read job status");
    if status.state.is_terminal() {
      return status;
    }
    tokio::time::sleep(StdDuration::from_millis(5)).await;
  }
  panic!("job {} did not finish in time", job_id);
}
