//! Error types for the control plane.
//!
//! This module defines all errors that can occur while accepting gitspace
//! actions and orchestrating infrastructure on their behalf.

use gitspace_core::{GitspaceInstanceId, IdentifierError, InfraProviderConfigId, InfraProviderResourceId, InfraProvisionedId};
use gitspace_infra::{InfraError, InfraEvent};
use gitspace_store::{GitspaceInstanceState, InfraStatus};
use thiserror::Error;

use crate::authz::AuthzError;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The gitspace identifier is malformed.
    #[error("invalid gitspace identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),

    /// No space reference was supplied.
    #[error("a space reference is required, standalone gitspaces are not supported")]
    MissingSpaceRef,

    /// The referenced space does not exist.
    #[error("space not found: {0}")]
    SpaceNotFound(String),

    /// The gitspace config does not exist or is deleted.
    #[error("gitspace not found: {0}")]
    GitspaceNotFound(String),

    /// The infra provider resource of a config does not exist.
    #[error("infra provider resource not found: {0}")]
    ResourceNotFound(InfraProviderResourceId),

    /// The infra provider config of a resource does not exist.
    #[error("infra provider config not found: {0}")]
    ProviderConfigNotFound(InfraProviderConfigId),

    /// The template referenced by a resource does not exist.
    #[error("infra provider template not found: {0}")]
    TemplateNotFound(String),

    /// The caller may not perform the action.
    #[error("forbidden: {0}")]
    Forbidden(#[from] AuthzError),

    /// Another action on the gitspace has not finished yet.
    #[error("gitspace {identifier} is busy: last action left it {state}")]
    ActionPending {
        /// Instance identifier.
        identifier: String,
        /// State the instance is stuck in.
        state: GitspaceInstanceState,
    },

    /// Stop was requested for a gitspace that is not running.
    #[error("gitspace {0} is not running")]
    NotRunning(String),

    /// A fresh provisioning attempt is still pending.
    #[error("there is already infra provisioning in pending state: record {0}")]
    AlreadyProvisioning(InfraProvisionedId),

    /// No provisioned infrastructure could be found for the instance.
    #[error("no provisioned infrastructure found for instance {0}")]
    InfraNotFound(GitspaceInstanceId),

    /// The provisioned infrastructure is in a status the operation cannot act on.
    #[error("infrastructure of instance {instance_id} is {status}, cannot {event}")]
    UnexpectedInfraStatus {
        /// Instance the infrastructure belongs to.
        instance_id: GitspaceInstanceId,
        /// Status found in the latest record.
        status: InfraStatus,
        /// Operation that was attempted.
        event: InfraEvent,
    },

    /// The requested state transition is not valid.
    #[error("invalid state transition for instance {identifier}: cannot transition from {from} to {to}")]
    InvalidState {
        /// Instance identifier.
        identifier: String,
        /// The current state.
        from: GitspaceInstanceState,
        /// The requested target state.
        to: GitspaceInstanceState,
    },

    /// A provider call failed.
    #[error("failed to {event} infrastructure: {source}")]
    Provider {
        /// Operation that failed.
        event: InfraEvent,
        /// Underlying provider error.
        #[source]
        source: InfraError,
    },

    /// Provider resolution, parameter handling or validation failed.
    #[error("infra error: {0}")]
    Infra(#[from] InfraError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] gitspace_store::StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidIdentifier(_) | Self::MissingSpaceRef => 400,
            Self::Forbidden(_) => 403,
            Self::SpaceNotFound(_)
            | Self::GitspaceNotFound(_)
            | Self::ResourceNotFound(_)
            | Self::ProviderConfigNotFound(_)
            | Self::TemplateNotFound(_)
            | Self::InfraNotFound(_) => 404,
            Self::ActionPending { .. }
            | Self::NotRunning(_)
            | Self::AlreadyProvisioning(_)
            | Self::UnexpectedInfraStatus { .. }
            | Self::InvalidState { .. } => 409,
            Self::Provider { source, .. } => source.http_status_code(),
            Self::Infra(e) => e.http_status_code(),
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ActionPending { .. } | Self::AlreadyProvisioning(_) => true,
            Self::Provider { source, .. } | Self::Infra(source) => source.is_retriable(),
            Self::Store(_) | Self::Internal(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitspace_core::IdentifierError;

    #[test]
    fn error_status_codes() {
        assert_eq!(
            ControlError::InvalidIdentifier(IdentifierError::Empty).http_status_code(),
            400
        );
        assert_eq!(ControlError::MissingSpaceRef.http_status_code(), 400);
        assert_eq!(
            ControlError::SpaceNotFound("acme".to_string()).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::ActionPending {
                identifier: "ws-abc123".to_string(),
                state: GitspaceInstanceState::Starting,
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            ControlError::AlreadyProvisioning(InfraProvisionedId::new(3)).http_status_code(),
            409
        );
        assert_eq!(
            ControlError::Infra(InfraError::InvalidParams("zone".to_string())).http_status_code(),
            400
        );
        assert_eq!(
            ControlError::Provider {
                event: InfraEvent::Provision,
                source: InfraError::Provider("quota".to_string()),
            }
            .http_status_code(),
            503
        );
    }

    #[test]
    fn retriable_errors() {
        assert!(ControlError::AlreadyProvisioning(InfraProvisionedId::new(1)).is_retriable());
        assert!(ControlError::Provider {
            event: InfraEvent::Stop,
            source: InfraError::Docker("connection refused".to_string()),
        }
        .is_retriable());
        assert!(!ControlError::Infra(InfraError::InvalidParams("x".to_string())).is_retriable());
        assert!(!ControlError::MissingSpaceRef.is_retriable());
    }
}
