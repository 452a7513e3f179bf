//! Rate gate: pre-flight limits checked before a check-in workflow starts
//!
//! Two independent limits:
//! - submissions: at most N check-ins per user in any trailing 24h window
//! - generation quota: at most M plans (meal + workout combined) per user
//!   within the coach-configured cycle length
//!
//! The cycle length is read from `coach_settings` on every check, never cached.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::LimitsConfig;
use crate::db::{from_millis, to_millis};
use crate::error::CoachError;
use crate::i18n::{quota_message, submission_limit_message, Language};
use crate::onboarding::{get_cycle_length_days, MAX_CYCLE_LENGTH_DAYS};
use crate::plans::plan_times_since;

/// ---------------------------------------------------------------------------
/// Limiter
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
  pub max_hits: u32,
  pub window: Duration,
}

impl RateLimitPolicy {
  pub fn per_day(max_hits: u32) -> Self {
    Self {
      max_hits,
      window: Duration::days(1),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
  pub ok: bool,
  pub retry_after_secs: Option<u64>,
}

/// Counts hits per key. An admitted call consumes one hit; a denied call
/// consumes nothing.
#[async_trait]
pub trait RateLimiter: Send + Sync {
  async fn limit(&self, key: &str, policy: &RateLimitPolicy) -> Result<RateLimitDecision, CoachError>;
}

/// Hit log in SQLite. Admission is a single conditional INSERT so concurrent
/// callers cannot both take the last slot.
#[derive(Clone)]
pub struct SqliteRateLimiter {
  pool: SqlitePool,
}

impl SqliteRateLimiter {
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  pub async fn limit_at(
    &self,
    key: &str,
    policy: &RateLimitPolicy,
    now: DateTime<Utc>,
  ) -> Result<RateLimitDecision, CoachError> {
    let window_start = to_millis(now - policy.window);

    sqlx::query("DELETE FROM rate_limit_hits WHERE limit_key = ?1 AND hit_at <= ?2")
      .bind(key)
      .bind(window_start)
      .execute(&self.pool)
      .await?;

    let admitted = sqlx::query(
      r#"
      INSERT INTO rate_limit_hits (limit_key, hit_at)
      SELECT ?1, ?2
      WHERE (
        SELECT COUNT(*) FROM rate_limit_hits WHERE limit_key = ?1 AND hit_at > ?3
      ) < ?4
      "#,
    )
    .bind(key)
    .bind(to_millis(now))
    .bind(window_start)
    .bind(policy.max_hits as i64)
    .execute(&self.pool)
    .await?
    .rows_affected()
      == 1;

    if admitted {
      return Ok(RateLimitDecision {
        ok: true,
        retry_after_secs: None,
      });
    }

    let oldest: Option<i64> = sqlx::query_scalar(
      "SELECT MIN(hit_at) FROM rate_limit_hits WHERE limit_key = ?1 AND hit_at > ?2",
    )
    .bind(key)
    .bind(window_start)
    .fetch_one(&self.pool)
    .await?;

    let retry_after = oldest
      .map(|ms| from_millis(ms) + policy.window - now)
      .unwrap_or(policy.window);

    Ok(RateLimitDecision {
      ok: false,
      retry_after_secs: Some(ceil_secs(retry_after)),
    })
  }
}

#[async_trait]
impl RateLimiter for SqliteRateLimiter {
  async fn limit(&self, key: &str, policy: &RateLimitPolicy) -> Result<RateLimitDecision, CoachError> {
    self.limit_at(key, policy, Utc::now()).await
  }
}

/// Round up to whole seconds, never below 1
fn ceil_secs(d: Duration) -> u64 {
  let ms = d.num_milliseconds().max(1) as u64;
  ms.div_ceil(1000)
}

/// ---------------------------------------------------------------------------
/// Gate
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
  pub allowed: bool,
  pub used: i64,
  pub limit: u32,
  pub cycle_length_days: i64,
  pub retry_after_secs: Option<u64>,
}

pub struct RateGate {
  pool: SqlitePool,
  limiter: Arc<dyn RateLimiter>,
  limits: LimitsConfig,
}

impl RateGate {
  pub fn new(pool: SqlitePool, limiter: Arc<dyn RateLimiter>, limits: LimitsConfig) -> Self {
    Self {
      pool,
      limiter,
      limits,
    }
  }

  fn submission_key(user_id: &str) -> String {
    format!("checkin:{}", user_id)
  }

  /// Consume one submission slot if available
  pub async fn check_submission(&self, user_id: &str) -> Result<RateLimitDecision, CoachError> {
    let policy = RateLimitPolicy::per_day(self.limits.checkins_per_day);
    self.limiter.limit(&Self::submission_key(user_id), &policy).await
  }

  /// Count meal + workout plans created in the trailing cycle window
  pub async fn check_generation_quota(
    &self,
    user_id: &str,
    cycle_length_days: i64,
  ) -> Result<QuotaDecision, CoachError> {
    self
      .check_generation_quota_at(user_id, cycle_length_days, Utc::now())
      .await
  }

  pub async fn check_generation_quota_at(
    &self,
    user_id: &str,
    cycle_length_days: i64,
    now: DateTime<Utc>,
  ) -> Result<QuotaDecision, CoachError> {
    let cycle = Duration::days(cycle_length_days.clamp(1, MAX_CYCLE_LENGTH_DAYS));
    let times = plan_times_since(&self.pool, user_id, now - cycle).await?;
    let used = times.len() as i64;
    let limit = self.limits.generations_per_cycle;
    let allowed = used < limit as i64;

    // Wait until enough of the oldest plans age out to free one slot
    let retry_after_secs = if allowed {
      None
    } else {
      let must_expire = (used - limit as i64) as usize;
      times
        .get(must_expire)
        .map(|created| ceil_secs(*created + cycle - now))
    };

    Ok(QuotaDecision {
      allowed,
      used,
      limit,
      cycle_length_days,
      retry_after_secs,
    })
  }

  /// Quota check with the cycle length read fresh from coach settings
  pub async fn current_quota(&self, user_id: &str) -> Result<QuotaDecision, CoachError> {
    let cycle_length_days =
      get_cycle_length_days(&self.pool, self.limits.default_cycle_length_days).await?;
    self.check_generation_quota(user_id, cycle_length_days).await
  }

  /// Generation quota, then submission limit. Denials become user-facing
  /// errors carrying a retry hint. The quota check is read-only, so only an
  /// attempt that passes it consumes a submission slot.
  pub async fn ensure_can_start(&self, user_id: &str, language: Language) -> Result<(), CoachError> {
    self.ensure_generation_quota(user_id, language).await?;

    let submission = self.check_submission(user_id).await?;
    if !submission.ok {
      let retry_after_secs = submission.retry_after_secs.unwrap_or(86_400);
      tracing::info!(user_id, retry_after_secs, "check-in rejected by submission limit");
      return Err(CoachError::RateLimited {
        message: submission_limit_message(language, self.limits.checkins_per_day, retry_after_secs),
        retry_after_secs,
      });
    }

    Ok(())
  }

  pub async fn ensure_generation_quota(
    &self,
    user_id: &str,
    language: Language,
  ) -> Result<(), CoachError> {
    let quota = self.current_quota(user_id).await?;
    if quota.allowed {
      return Ok(());
    }

    let retry_after_secs = quota.retry_after_secs.unwrap_or(86_400);
    tracing::info!(
      user_id,
      used = quota.used,
      cycle_length_days = quota.cycle_length_days,
      "plan generation rejected by cycle quota"
    );
    Err(CoachError::QuotaExceeded {
      message: quota_message(language, quota.cycle_length_days, retry_after_secs),
      retry_after_secs,
    })
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
