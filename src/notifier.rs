//! "Plans ready" notifications
//!
//! Push goes to the user's active subscription, if any. Email is only a
//! fallback for users with no active push subscription. Delivery failures
//! are logged and never retried; nothing here fails the calling workflow.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::config::SmtpConfig;
use crate::db::{new_id, to_millis};
use crate::error::CoachError;
use crate::i18n::{self, Language};
use crate::onboarding;

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum NotifyError {
  /// Endpoint reported the subscription no longer exists (404/410)
  #[error("Push subscription expired")]
  Gone,

  #[error("Push delivery failed: {0}")]
  Push(String),

  #[error("SMTP transport error: {0}")]
  Smtp(#[from] lettre::transport::smtp::Error),

  #[error("Email address parse error: {0}")]
  Address(#[from] lettre::address::AddressError),

  #[error("Email build error: {0}")]
  Build(String),
}

/// ---------------------------------------------------------------------------
/// Push Subscriptions
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
  pub id: String,
  pub user_id: String,
  pub endpoint: String,
  pub p256dh: Option<String>,
  pub auth: Option<String>,
}

/// Register (or re-activate) a push endpoint for a user
pub async fn register_subscription(
  pool: &SqlitePool,
  user_id: &str,
  endpoint: &str,
  p256dh: Option<&str>,
  auth: Option<&str>,
) -> Result<String, CoachError> {
  let endpoint = endpoint.trim();
  if url::Url::parse(endpoint).is_err() {
    return Err(CoachError::Validation("push endpoint must be a valid URL".to_string()));
  }

  let id: String = sqlx::query_scalar(
    r#"
    INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh, auth, active, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
    ON CONFLICT(user_id, endpoint) DO UPDATE SET
      p256dh = excluded.p256dh,
      auth = excluded.auth,
      active = 1
    RETURNING id
    "#,
  )
  .bind(new_id())
  .bind(user_id)
  .bind(endpoint)
  .bind(p256dh)
  .bind(auth)
  .bind(to_millis(Utc::now()))
  .fetch_one(pool)
  .await?;

  tracing::info!(user_id, subscription_id = %id, "push subscription registered");
  Ok(id)
}

/// Returns false when no matching active subscription existed
pub async fn remove_subscription(
  pool: &SqlitePool,
  user_id: &str,
  endpoint: &str,
) -> Result<bool, CoachError> {
  let result = sqlx::query(
    "UPDATE push_subscriptions SET active = 0 WHERE user_id = ?1 AND endpoint = ?2 AND active = 1",
  )
  .bind(user_id)
  .bind(endpoint.trim())
  .execute(pool)
  .await?;

  Ok(result.rows_affected() > 0)
}

/// Most recently registered active subscription
pub async fn active_subscription(
  pool: &SqlitePool,
  user_id: &str,
) -> Result<Option<PushSubscription>, CoachError> {
  let row = sqlx::query(
    r#"
    SELECT id, user_id, endpoint, p256dh, auth
    FROM push_subscriptions
    WHERE user_id = ?1 AND active = 1
    ORDER BY created_at DESC, rowid DESC
    LIMIT 1
    "#,
  )
  .bind(user_id)
  .fetch_optional(pool)
  .await?;

  Ok(row.map(|row| PushSubscription {
    id: row.get("id"),
    user_id: row.get("user_id"),
    endpoint: row.get("endpoint"),
    p256dh: row.get("p256dh"),
    auth: row.get("auth"),
  }))
}

pub async fn has_active_push_subscription(pool: &SqlitePool, user_id: &str) -> Result<bool, CoachError> {
  Ok(active_subscription(pool, user_id).await?.is_some())
}

async fn deactivate(pool: &SqlitePool, subscription_id: &str) -> Result<(), CoachError> {
  sqlx::query("UPDATE push_subscriptions SET active = 0 WHERE id = ?1")
    .bind(subscription_id)
    .execute(pool)
    .await?;
  Ok(())
}

/// ---------------------------------------------------------------------------
/// Delivery Channels
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
  pub title: String,
  pub body: String,
  pub data: serde_json::Value,
}

#[async_trait]
pub trait PushSender: Send + Sync {
  async fn send_push(&self, subscription: &PushSubscription, message: &PushMessage) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
  async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Posts the message as JSON to the subscription endpoint (push gateway)
pub struct HttpPushSender {
  client: Client,
}

impl HttpPushSender {
  pub fn new(timeout: Duration) -> Result<Self, CoachError> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| CoachError::Config(format!("push client: {}", e)))?;
    Ok(Self { client })
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushEnvelope<'a> {
  keys: PushKeys<'a>,
  notification: &'a PushMessage,
}

#[derive(Serialize)]
struct PushKeys<'a> {
  p256dh: Option<&'a str>,
  auth: Option<&'a str>,
}

#[async_trait]
impl PushSender for HttpPushSender {
  async fn send_push(&self, subscription: &PushSubscription, message: &PushMessage) -> Result<(), NotifyError> {
    let envelope = PushEnvelope {
      keys: PushKeys {
        p256dh: subscription.p256dh.as_deref(),
        auth: subscription.auth.as_deref(),
      },
      notification: message,
    };

    let response = self
      .client
      .post(&subscription.endpoint)
      .header("TTL", "86400")
      .json(&envelope)
      .send()
      .await
      .map_err(|e| NotifyError::Push(e.to_string()))?;

    match response.status() {
      status if status.is_success() => Ok(()),
      StatusCode::NOT_FOUND | StatusCode::GONE => Err(NotifyError::Gone),
      status => Err(NotifyError::Push(format!("HTTP {}", status))),
    }
  }
}

pub struct SmtpEmailSender {
  config: SmtpConfig,
}

impl SmtpEmailSender {
  pub fn new(config: SmtpConfig) -> Self {
    Self { config }
  }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
  async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
    use lettre::{
      message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
      AsyncTransport, Message, Tokio1Executor,
    };

    let email = Message::builder()
      .from(self.config.from_address.parse()?)
      .to(to.parse()?)
      .subject(subject)
      .header(ContentType::TEXT_PLAIN)
      .body(body.to_string())
      .map_err(|e| NotifyError::Build(e.to_string()))?;

    let mut transport_builder =
      AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)?.port(self.config.port);

    if let (Some(user), Some(pass)) = (&self.config.user, &self.config.password) {
      transport_builder = transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }

    transport_builder.build().send(email).await?;
    Ok(())
  }
}

/// ---------------------------------------------------------------------------
/// Notifier
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
  Delivered,
  NoSubscription,
  Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailOutcome {
  Sent,
  /// User has an active push subscription
  Skipped,
  NoAddress,
  /// No email channel configured
  Disabled,
  Failed,
}

pub struct Notifier {
  pool: SqlitePool,
  push: Arc<dyn PushSender>,
  email: Option<Arc<dyn EmailSender>>,
}

impl Notifier {
  pub fn new(pool: SqlitePool, push: Arc<dyn PushSender>, email: Option<Arc<dyn EmailSender>>) -> Self {
    Self { pool, push, email }
  }

  async fn language_of(&self, user_id: &str) -> Result<Language, CoachError> {
    Ok(
      onboarding::get_profile(&self.pool, user_id)
        .await?
        .map(|p| p.preferred_language)
        .unwrap_or_default(),
    )
  }

  pub async fn notify_plans_ready(
    &self,
    user_id: &str,
    meal_plan_id: &str,
    workout_plan_id: &str,
  ) -> Result<PushOutcome, CoachError> {
    let Some(subscription) = active_subscription(&self.pool, user_id).await? else {
      tracing::debug!(user_id, "no active push subscription");
      return Ok(PushOutcome::NoSubscription);
    };

    let (title, body) = i18n::plans_ready_push(self.language_of(user_id).await?);
    let message = PushMessage {
      title: title.to_string(),
      body: body.to_string(),
      data: serde_json::json!({
        "mealPlanId": meal_plan_id,
        "workoutPlanId": workout_plan_id,
      }),
    };

    match self.push.send_push(&subscription, &message).await {
      Ok(()) => {
        tracing::info!(user_id, "plans-ready push delivered");
        Ok(PushOutcome::Delivered)
      }
      Err(NotifyError::Gone) => {
        tracing::warn!(user_id, subscription_id = %subscription.id, "push endpoint gone, deactivating");
        deactivate(&self.pool, &subscription.id).await?;
        Ok(PushOutcome::Failed)
      }
      Err(e) => {
        tracing::warn!(user_id, error = %e, "plans-ready push failed");
        Ok(PushOutcome::Failed)
      }
    }
  }

  /// Email the user only if they have no active push subscription
  pub async fn send_fallback_email(&self, user_id: &str) -> Result<EmailOutcome, CoachError> {
    if has_active_push_subscription(&self.pool, user_id).await? {
      return Ok(EmailOutcome::Skipped);
    }

    let Some(sender) = &self.email else {
      tracing::debug!(user_id, "email delivery not configured");
      return Ok(EmailOutcome::Disabled);
    };

    let profile = onboarding::get_profile(&self.pool, user_id).await?;
    let Some((address, language, name)) = profile.and_then(|p| {
      p.email
        .clone()
        .filter(|e| !e.trim().is_empty())
        .map(|e| (e, p.preferred_language, p.display_name))
    }) else {
      tracing::warn!(user_id, "no email address on file for fallback notification");
      return Ok(EmailOutcome::NoAddress);
    };

    let (subject, body) = i18n::plans_ready_email(language, name.as_deref());
    match sender.send_email(&address, &subject, &body).await {
      Ok(()) => {
        tracing::info!(user_id, "plans-ready email sent");
        Ok(EmailOutcome::Sent)
      }
      Err(e) => {
        tracing::warn!(user_id, error = %e, "plans-ready email failed");
        Ok(EmailOutcome::Failed)
      }
    }
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
