//! Error types for the infra crate.

use gitspace_store::InfraProviderType;
use thiserror::Error;

/// Errors that can occur while talking to an infrastructure provider.
#[derive(Error, Debug)]
pub enum InfraError {
    /// The Docker engine rejected or failed a request.
    #[error("Docker engine error: {0}")]
    Docker(String),

    /// A provider backend failed.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provisioning parameters are missing or malformed.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// A provider configuration is malformed.
    #[error("Invalid provider config: {0}")]
    InvalidConfig(String),

    /// No provider is registered for the requested type.
    #[error("No infra provider registered for type {0}")]
    ProviderNotFound(InfraProviderType),

    /// The provider does not support the requested operation.
    #[error("Operation not supported by {provider}: {operation}")]
    Unsupported {
        /// Provider type.
        provider: InfraProviderType,
        /// Operation name.
        operation: &'static str,
    },

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InfraError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Docker(_) | Self::Provider(_))
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidParams(_) | Self::InvalidConfig(_) | Self::Unsupported { .. } => 400,
            Self::ProviderNotFound(_) => 404,
            Self::Serialization(_) => 500,
            Self::Docker(_) | Self::Provider(_) => 503,
        }
    }
}

impl From<bollard::errors::Error> for InfraError {
    fn from(err: bollard::errors::Error) -> Self {
        Self::Docker(err.to_string())
    }
}

/// A specialized Result type for infra operations.
pub type Result<T> = std::result::Result<T, InfraError>;
