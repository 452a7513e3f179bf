//! Check-in photo uploads. File references are namespaced by user id; a
//! caller can only resolve or discard references under their own prefix.

use std::sync::Arc;

use crate::error::CoachError;
use crate::identity::{require_user, IdentityProvider};
use crate::state::AppState;
use crate::storage::{BlobStore, UploadTicket};

fn blobs(state: &AppState) -> Result<&Arc<dyn BlobStore>, CoachError> {
  state
    .blobs
    .as_ref()
    .ok_or_else(|| CoachError::Config("photo storage is not configured".to_string()))
}

fn ensure_owned(user_id: &str, file_ref: &str) -> Result<(), CoachError> {
  let owned = file_ref
    .strip_prefix(user_id)
    .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1);
  if owned {
    Ok(())
  } else {
    Err(CoachError::Forbidden("photo belongs to another user".to_string()))
  }
}

pub async fn generate_photo_upload_url(
  state: &AppState,
  identity: &dyn IdentityProvider,
) -> Result<UploadTicket, CoachError> {
  let user_id = require_user(identity)?;
  let ticket = blobs(state)?.upload_url(&user_id).await?;
  ensure_owned(&user_id, &ticket.file_ref)?;
  Ok(ticket)
}

pub async fn get_photo_url(
  state: &AppState,
  identity: &dyn IdentityProvider,
  file_ref: String,
) -> Result<String, CoachError> {
  let user_id = require_user(identity)?;
  ensure_owned(&user_id, &file_ref)?;
  Ok(blobs(state)?.get_url(&file_ref).await?)
}

/// Delete an uploaded photo that was never attached to a check-in
pub async fn discard_photo_upload(
  state: &AppState,
  identity: &dyn IdentityProvider,
  file_ref: String,
) -> Result<(), CoachError> {
  let user_id = require_user(identity)?;
  ensure_owned(&user_id, &file_ref)?;
  Ok(blobs(state)?.delete(&file_ref).await?)
}
