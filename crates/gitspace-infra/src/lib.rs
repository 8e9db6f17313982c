//! Infrastructure providers for gitspaces.
//!
//! This crate provides the [`InfraProvider`] trait every backend implements, the
//! [`InfraProviderFactory`] that resolves a provider by type, and the
//! [`DockerProvider`] reference implementation. It handles:
//!
//! - Provisioning, stopping, deprovisioning and instance cleanup
//! - Parameter validation and the provider-described parameter schema
//! - Completion reporting through an [`InfraEventSink`]
//! - Encoding of parameter lists for durable records
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Infra Provisioner                            │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │ get(type)                      ▲ InfraEventReport
//!                 ▼                                │
//! ┌──────────────────────────────┐      ┌──────────────────────────┐
//! │     InfraProviderFactory     │      │      InfraEventSink      │
//! │  (immutable, built at boot)  │      │   (tokio mpsc channel)   │
//! └──────────────────────────────┘      └──────────────────────────┘
//!                 │                                ▲
//!                 ▼                                │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    DockerProvider / others                       │
//! │   ┌─────────────┐ ┌─────────────┐ ┌─────────────────────────┐   │
//! │   │  Provision  │ │ Stop        │ │ Deprovision / Cleanup   │   │
//! │   └─────────────┘ └─────────────┘ └─────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │
//!                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                Docker engine (bollard) / VM pools                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gitspace_infra::{
//!     BollardEngine, ChannelSink, DockerProvider, DockerProviderConfig, InfraProviderFactory,
//! };
//! use gitspace_store::InfraProviderType;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _completions) = ChannelSink::channel();
//! let config = DockerProviderConfig::from_env();
//! let engine = BollardEngine::connect(config.socket_path.as_deref())?;
//! let docker = DockerProvider::new(Arc::new(engine), Arc::new(sink), config);
//!
//! let factory = InfraProviderFactory::builder()
//!     .register(Arc::new(docker))
//!     .build();
//! let provider = factory.get(InfraProviderType::Docker)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a Docker daemon, enable the `test-utils` feature and use
//! [`MockInfraProvider`] or a [`DockerProvider`] over a `MemoryDockerEngine`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod docker;
pub mod error;
pub mod factory;
pub mod params;
pub mod provider;
pub mod sink;
pub mod types;

pub use docker::{volume_name, BollardEngine, DockerEngine, DockerProvider, DockerProviderConfig};
pub use error::{InfraError, Result};
pub use factory::{InfraProviderFactory, InfraProviderFactoryBuilder};
pub use params::{params_to_string, string_to_params};
pub use provider::InfraProvider;
pub use sink::{ChannelSink, InfraEventSink};
pub use types::{
    FindRequest, GitspacePort, InfraEvent, InfraEventReport, Infrastructure, InstanceInfo,
    ParameterSchema, PortMapping, PortProtocol, ProvisionRequest, ProvisioningType,
};

#[cfg(any(test, feature = "test-utils"))]
pub use docker::MemoryDockerEngine;
#[cfg(any(test, feature = "test-utils"))]
pub use provider::mock::MockInfraProvider;
