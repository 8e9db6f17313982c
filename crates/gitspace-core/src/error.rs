//! Common error types for the gitspace orchestrator.
//!
//! This module provides shared error types that are used across multiple crates.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the gitspace system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An invalid numeric identifier was provided.
    #[error("invalid id: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// A user supplied identifier failed validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] crate::naming::IdentifierError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
