//! Core types and utilities for the gitspace orchestrator.
//!
//! This crate provides the foundational types used by every other gitspace crate:
//!
//! - **Identifiers**: Strongly-typed integer IDs for spaces, configs, instances,
//!   provider resources and provisioned records
//! - **Naming**: Identifier validation, instance identifier generation and the
//!   deterministic routing key used by SSH piper backed providers
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use gitspace_core::{naming, GitspaceConfigId, SpaceId};
//!
//! let space_id = SpaceId::new(7);
//! let config_id: GitspaceConfigId = "42".parse().unwrap();
//! assert_eq!(config_id.get(), 42);
//! assert_eq!(space_id.to_string(), "7");
//!
//! naming::validate_identifier("my-gitspace").unwrap();
//! let instance = naming::instance_identifier("My-Gitspace");
//! assert!(instance.starts_with("my-gitspace-"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod naming;

pub use error::{CoreError, Result};
pub use ids::{
    GitspaceConfigId, GitspaceEventId, GitspaceInstanceId, IdError, InfraProviderConfigId,
    InfraProviderResourceId, InfraProviderTemplateId, InfraProvisionedId, SpaceId,
};
pub use naming::IdentifierError;
