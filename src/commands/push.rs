use crate::error::CoachError;
use crate::identity::{require_user, IdentityProvider};
use crate::notifier;
use crate::state::AppState;

pub async fn register_push_subscription(
  state: &AppState,
  identity: &dyn IdentityProvider,
  endpoint: String,
  p256dh: Option<String>,
  auth: Option<String>,
) -> Result<String, CoachError> {
  let user_id = require_user(identity)?;
  notifier::register_subscription(&state.db, &user_id, &endpoint, p256dh.as_deref(), auth.as_deref()).await
}

pub async fn remove_push_subscription(
  state: &AppState,
  identity: &dyn IdentityProvider,
  endpoint: String,
) -> Result<bool, CoachError> {
  let user_id = require_user(identity)?;
  notifier::remove_subscription(&state.db, &user_id, &endpoint).await
}
