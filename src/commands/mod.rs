//! Caller-facing operations
//!
//! Each command resolves the calling user, applies authorization, and
//! delegates to the core modules. Errors are [`CoachError`], which
//! serializes to its display string for the transport layer.

pub mod check_in;
pub mod coach;
pub mod onboarding;
pub mod photos;
pub mod plans;
pub mod push;

use crate::error::CoachError;
use crate::identity::{require_user, IdentityProvider};
use crate::models::Profile;
use crate::state::AppState;

/// Authenticated user that must also have completed profile setup
pub(crate) async fn current_profile(
  state: &AppState,
  identity: &dyn IdentityProvider,
) -> Result<Profile, CoachError> {
  let user_id = require_user(identity)?;
  crate::onboarding::get_profile(&state.db, &user_id)
    .await?
    .ok_or_else(|| CoachError::Precondition("profile not found".to_string()))
}
