//! Coach-only settings and knowledge curation

use crate::error::CoachError;
use crate::identity::{require_user, IdentityProvider};
use crate::onboarding;
use crate::state::AppState;

pub async fn get_cycle_length(state: &AppState, identity: &dyn IdentityProvider) -> Result<i64, CoachError> {
  require_user(identity)?;
  onboarding::get_cycle_length_days(&state.db, state.config.limits.default_cycle_length_days).await
}

/// Takes effect on the next quota check; nothing is cached
pub async fn update_cycle_length(
  state: &AppState,
  identity: &dyn IdentityProvider,
  days: i64,
) -> Result<(), CoachError> {
  let user_id = require_user(identity)?;
  onboarding::require_coach(&state.db, &user_id).await?;
  onboarding::set_cycle_length_days(&state.db, days, &user_id).await
}

pub async fn add_knowledge_passage(
  state: &AppState,
  identity: &dyn IdentityProvider,
  title: String,
  body: String,
) -> Result<i64, CoachError> {
  let user_id = require_user(identity)?;
  onboarding::require_coach(&state.db, &user_id).await?;
  let id = state.knowledge.add_passage(&title, &body, &user_id).await?;
  tracing::info!(user_id = %user_id, passage_id = id, "knowledge passage added");
  Ok(id)
}
