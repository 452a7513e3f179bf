//! Process configuration loaded from the environment
//!
//! Coach-controlled values (cycle length) are NOT here: they live in the
//! `coach_settings` table and are re-read on every check.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoachError;
use crate::onboarding::MAX_CYCLE_LENGTH_DAYS;

/// ---------------------------------------------------------------------------
/// Defaults
/// ---------------------------------------------------------------------------

const DEFAULT_DATABASE_URL: &str = "sqlite://coach.db?mode=rwc";
pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_FROM_ADDRESS: &str = "coach@localhost";
const MAX_LLM_RETRIES: u32 = 10;

/// ---------------------------------------------------------------------------
/// Config Structs
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LlmConfig {
  pub api_key: String,
  pub api_url: String,
  pub model: String,
  pub max_retries: u32,
  /// First retry delay; doubles per attempt
  pub retry_base_delay: Duration,
  pub request_timeout: Duration,
}

impl LlmConfig {
  pub fn new(api_key: impl Into<String>) -> Self {
    Self {
      api_key: api_key.into(),
      api_url: DEFAULT_API_URL.to_string(),
      model: DEFAULT_MODEL.to_string(),
      max_retries: 3,
      retry_base_delay: Duration::from_millis(500),
      request_timeout: Duration::from_secs(120),
    }
  }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
  /// Process-wide cap on concurrently running jobs
  pub max_parallelism: usize,
  pub job_timeout: Duration,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_parallelism: 5,
      job_timeout: Duration::from_secs(300),
    }
  }
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
  pub poll_interval: Duration,
  pub max_poll_attempts: u32,
}

impl Default for WorkflowConfig {
  fn default() -> Self {
    // 450 x 2s = 15 minutes before a run is declared timed out
    Self {
      poll_interval: Duration::from_millis(2000),
      max_poll_attempts: 450,
    }
  }
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
  pub checkins_per_day: u32,
  pub generations_per_cycle: u32,
  /// Used when the coach has not configured a cycle length
  pub default_cycle_length_days: i64,
}

impl Default for LimitsConfig {
  fn default() -> Self {
    Self {
      checkins_per_day: 3,
      generations_per_cycle: 2,
      default_cycle_length_days: 14,
    }
  }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
  pub host: String,
  pub port: u16,
  pub from_address: String,
  pub user: Option<String>,
  pub password: Option<String>,
}

impl SmtpConfig {
  /// Returns `None` when `SMTP_HOST` is unset (email delivery disabled)
  pub fn from_env() -> Option<Self> {
    let host = env::var("SMTP_HOST").ok()?;
    Some(Self {
      host,
      port: parse_var("SMTP_PORT").unwrap_or(DEFAULT_SMTP_PORT),
      from_address: env::var("SMTP_FROM").unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
      user: env::var("SMTP_USER").ok(),
      password: env::var("SMTP_PASSWORD").ok(),
    })
  }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub database_url: String,
  /// `None` when `ANTHROPIC_API_KEY` is unset
  pub llm: Option<LlmConfig>,
  pub queue: QueueConfig,
  pub workflow: WorkflowConfig,
  pub limits: LimitsConfig,
  pub smtp: Option<SmtpConfig>,
  pub push_timeout: Duration,
  pub blob_gateway_url: Option<url::Url>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      database_url: DEFAULT_DATABASE_URL.to_string(),
      llm: None,
      queue: QueueConfig::default(),
      workflow: WorkflowConfig::default(),
      limits: LimitsConfig::default(),
      smtp: None,
      push_timeout: Duration::from_secs(10),
      blob_gateway_url: None,
    }
  }
}

impl AppConfig {
  /// Build config from environment variables, falling back to defaults
  pub fn from_env() -> Result<Self, CoachError> {
    let defaults = Self::default();

    let llm = match env::var("ANTHROPIC_API_KEY") {
      Ok(key) => {
        let mut llm = LlmConfig::new(key);
        if let Ok(api_url) = env::var("ANTHROPIC_API_URL") {
          llm.api_url = api_url;
        }
        if let Ok(model) = env::var("LLM_MODEL") {
          llm.model = model;
        }
        if let Some(retries) = parse_var::<u32>("LLM_MAX_RETRIES") {
          if retries > MAX_LLM_RETRIES {
            return Err(CoachError::Config(format!(
              "LLM_MAX_RETRIES must be at most {}",
              MAX_LLM_RETRIES
            )));
          }
          llm.max_retries = retries;
        }
        Some(llm)
      }
      Err(_) => None,
    };

    let max_parallelism: usize =
      parse_var("WORKPOOL_MAX_PARALLELISM").unwrap_or(defaults.queue.max_parallelism);
    if max_parallelism == 0 {
      return Err(CoachError::Config(
        "WORKPOOL_MAX_PARALLELISM must be at least 1".to_string(),
      ));
    }

    let default_cycle_length_days: i64 =
      parse_var("DEFAULT_CYCLE_LENGTH_DAYS").unwrap_or(defaults.limits.default_cycle_length_days);
    if !(1..=MAX_CYCLE_LENGTH_DAYS).contains(&default_cycle_length_days) {
      return Err(CoachError::Config(format!(
        "DEFAULT_CYCLE_LENGTH_DAYS must be between 1 and {}",
        MAX_CYCLE_LENGTH_DAYS
      )));
    }

    let blob_gateway_url = match env::var("BLOB_GATEWAY_URL") {
      Ok(raw) => Some(
        url::Url::parse(&raw)
          .map_err(|e| CoachError::Config(format!("BLOB_GATEWAY_URL is not a valid URL: {}", e)))?,
      ),
      Err(_) => None,
    };

    Ok(Self {
      database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
      llm,
      queue: QueueConfig {
        max_parallelism,
        job_timeout: parse_var("WORKPOOL_JOB_TIMEOUT_SECS")
          .map(Duration::from_secs)
          .unwrap_or(defaults.queue.job_timeout),
      },
      workflow: WorkflowConfig {
        poll_interval: parse_var("WORKFLOW_POLL_INTERVAL_MS")
          .map(Duration::from_millis)
          .unwrap_or(defaults.workflow.poll_interval),
        max_poll_attempts: parse_var("WORKFLOW_MAX_POLL_ATTEMPTS")
          .unwrap_or(defaults.workflow.max_poll_attempts),
      },
      limits: LimitsConfig {
        checkins_per_day: parse_var("CHECKIN_DAILY_LIMIT")
          .unwrap_or(defaults.limits.checkins_per_day),
        generations_per_cycle: parse_var("GENERATIONS_PER_CYCLE")
          .unwrap_or(defaults.limits.generations_per_cycle),
        default_cycle_length_days,
      },
      smtp: SmtpConfig::from_env(),
      push_timeout: parse_var("PUSH_GATEWAY_TIMEOUT_SECS")
        .map(Duration::from_secs)
        .unwrap_or(defaults.push_timeout),
      blob_gateway_url,
    })
  }
}

/// Parse an env var, treating unset and unparseable values alike
fn parse_var<T: FromStr>(name: &str) -> Option<T> {
  env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
