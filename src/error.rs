//! Crate-wide error type
//!
//! Every public operation returns [`CoachError`]. Module-level errors
//! (`LlmError`, `QueueError`, ...) convert into it with `?`.

use serde::Serialize;

use crate::llm::LlmError;
use crate::queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum CoachError {
  #[error("Not authenticated")]
  Unauthenticated,

  #[error("Not allowed: {0}")]
  Forbidden(String),

  #[error("Invalid input: {0}")]
  Validation(String),

  /// Onboarding incomplete (missing profile or assessment)
  #[error("Cannot generate plan yet: {0}")]
  Precondition(String),

  #[error("{message}")]
  RateLimited { message: String, retry_after_secs: u64 },

  #[error("{message}")]
  QuotaExceeded { message: String, retry_after_secs: u64 },

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("AI provider error: {0}")]
  Llm(#[from] LlmError),

  #[error("Work queue error: {0}")]
  Queue(#[from] QueueError),

  #[error("Storage error: {0}")]
  Storage(String),

  #[error("Configuration error: {0}")]
  Config(String),

  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl CoachError {
  /// Seconds until the caller may retry, for rate-limit and quota denials
  pub fn retry_after_secs(&self) -> Option<u64> {
    match self {
      Self::RateLimited { retry_after_secs, .. } | Self::QuotaExceeded { retry_after_secs, .. } => {
        Some(*retry_after_secs)
      }
      _ => None,
    }
  }
}

impl Serialize for CoachError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}
