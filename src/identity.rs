//! Current-user lookup. Session mechanics belong to the caller; the core only
//! asks "who is calling?" and rejects anonymous requests.

use crate::error::CoachError;

pub trait IdentityProvider: Send + Sync {
  fn current_user_id(&self) -> Option<String>;
}

/// Identity fixed at construction, e.g. resolved by request middleware
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
  user_id: Option<String>,
}

impl StaticIdentity {
  pub fn user(user_id: impl Into<String>) -> Self {
    Self {
      user_id: Some(user_id.into()),
    }
  }

  pub fn anonymous() -> Self {
    Self { user_id: None }
  }
}

impl IdentityProvider for StaticIdentity {
  fn current_user_id(&self) -> Option<String> {
    self.user_id.clone()
  }
}

pub fn require_user(identity: &dyn IdentityProvider) -> Result<String, CoachError> {
  identity
    .current_user_id()
    .filter(|id| !id.trim().is_empty())
    .ok_or(CoachError::Unauthenticated)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_require_user() {
    assert_eq!(require_user(&StaticIdentity::user("u1")).unwrap(), "u1");
    assert!(matches!(
      require_user(&StaticIdentity::anonymous()),
      Err(CoachError::Unauthenticated)
    ));
    assert!(matches!(
      require_user(&StaticIdentity::user("  ")),
      Err(CoachError::Unauthenticated)
    ));
  }
}
