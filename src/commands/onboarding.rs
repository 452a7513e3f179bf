//! Profile and assessment commands

use crate::error::CoachError;
use crate::identity::{require_user, IdentityProvider};
use crate::models::{Assessment, Profile};
use crate::onboarding::{self, ProfileInput};
use crate::state::AppState;

pub async fn upsert_profile(
  state: &AppState,
  identity: &dyn IdentityProvider,
  input: ProfileInput,
) -> Result<Profile, CoachError> {
  let user_id = require_user(identity)?;
  onboarding::upsert_profile(&state.db, &user_id, &input).await?;
  onboarding::get_profile(&state.db, &user_id)
    .await?
    .ok_or_else(|| CoachError::NotFound(format!("profile for user {}", user_id)))
}

pub async fn get_profile(
  state: &AppState,
  identity: &dyn IdentityProvider,
) -> Result<Option<Profile>, CoachError> {
  let user_id = require_user(identity)?;
  onboarding::get_profile(&state.db, &user_id).await
}

/// Create or replace the caller's assessment
pub async fn submit_assessment(
  state: &AppState,
  identity: &dyn IdentityProvider,
  assessment: Assessment,
) -> Result<(), CoachError> {
  let user_id = require_user(identity)?;
  onboarding::upsert_assessment(&state.db, &user_id, &assessment).await?;
  tracing::info!(user_id = %user_id, "assessment submitted");
  Ok(())
}

pub async fn get_assessment(
  state: &AppState,
  identity: &dyn IdentityProvider,
) -> Result<Option<Assessment>, CoachError> {
  let user_id = require_user(identity)?;
  onboarding::get_assessment(&state.db, &user_id).await
}
