//! Permission checks for gitspace actions.
//!
//! The control plane only asks "may this session do this to that gitspace";
//! how the answer is computed belongs to the [`Authorizer`] implementation.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::GitspaceActionType;

/// The authenticated caller of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Stable principal identifier.
    pub principal_uid: String,
    /// Display name, used in logs only.
    #[serde(default)]
    pub display_name: String,
}

impl AuthSession {
    /// Create a session for a principal.
    #[must_use]
    pub fn new(principal_uid: impl Into<String>) -> Self {
        let principal_uid = principal_uid.into();
        Self {
            display_name: principal_uid.clone(),
            principal_uid,
        }
    }
}

/// Permissions checked on gitspaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read a gitspace.
    GitspaceView,
    /// Start or stop a gitspace.
    GitspaceUse,
    /// Delete a gitspace.
    GitspaceDelete,
}

impl Permission {
    /// Permission an action requires.
    #[must_use]
    pub const fn for_action(action: GitspaceActionType) -> Self {
        match action {
            GitspaceActionType::Start | GitspaceActionType::Stop => Self::GitspaceUse,
            GitspaceActionType::Delete => Self::GitspaceDelete,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GitspaceView => "gitspace_view",
            Self::GitspaceUse => "gitspace_use",
            Self::GitspaceDelete => "gitspace_delete",
        })
    }
}

/// A denied permission check.
#[derive(Debug, Clone, Error)]
#[error("{principal} lacks {permission} on gitspace {identifier} in {space_path}")]
pub struct AuthzError {
    /// Principal that was denied.
    pub principal: String,
    /// Permission that was checked.
    pub permission: Permission,
    /// Space path of the gitspace.
    pub space_path: String,
    /// Gitspace identifier.
    pub identifier: String,
}

/// Decides whether a session may act on a gitspace.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Check a permission on a gitspace in a space.
    ///
    /// # Errors
    ///
    /// Returns `AuthzError` when the permission is not granted.
    async fn check(
        &self,
        session: &AuthSession,
        space_path: &str,
        identifier: &str,
        permission: Permission,
    ) -> Result<(), AuthzError>;
}

/// Grants every permission. Used when access control is enforced upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAuthorizer;

#[async_trait]
impl Authorizer for AllowAllAuthorizer {
    async fn check(
        &self,
        _session: &AuthSession,
        _space_path: &str,
        _identifier: &str,
        _permission: Permission,
    ) -> Result<(), AuthzError> {
        Ok(())
    }
}

/// Mock authorizer for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Grants everything except permissions explicitly denied to a principal.
    #[derive(Default)]
    pub struct MockAuthorizer {
        denied: Mutex<HashSet<(String, Permission)>>,
    }

    impl MockAuthorizer {
        /// Create an authorizer that grants everything.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Deny a permission to a principal.
        pub fn deny(&self, principal_uid: impl Into<String>, permission: Permission) {
            self.denied.lock().insert((principal_uid.into(), permission));
        }
    }

    #[async_trait]
    impl Authorizer for MockAuthorizer {
        async fn check(
            &self,
            session: &AuthSession,
            space_path: &str,
            identifier: &str,
            permission: Permission,
        ) -> Result<(), AuthzError> {
            let denied = self
                .denied
                .lock()
                .contains(&(session.principal_uid.clone(), permission));
            if denied {
                return Err(AuthzError {
                    principal: session.principal_uid.clone(),
                    permission,
                    space_path: space_path.to_string(),
                    identifier: identifier.to_string(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockAuthorizer;
    use super::*;

    #[test]
    fn action_permissions() {
        assert_eq!(
            Permission::for_action(GitspaceActionType::Stop),
            Permission::GitspaceUse
        );
        assert_eq!(
            Permission::for_action(GitspaceActionType::Delete),
            Permission::GitspaceDelete
        );
    }

    #[tokio::test]
    async fn mock_denies_only_listed_permissions() {
        let authz = MockAuthorizer::new();
        authz.deny("bob", Permission::GitspaceDelete);
        let bob = AuthSession::new("bob");

        assert!(authz
            .check(&bob, "acme", "ws", Permission::GitspaceUse)
            .await
            .is_ok());
        let err = authz
            .check(&bob, "acme", "ws", Permission::GitspaceDelete)
            .await
            .unwrap_err();
        assert_eq!(err.permission, Permission::GitspaceDelete);
        assert!(AllowAllAuthorizer
            .check(&bob, "acme", "ws", Permission::GitspaceDelete)
            .await
            .is_ok());
    }
}
