//! Control plane for gitspace infrastructure lifecycle management.
//!
//! This crate accepts user actions on gitspaces (start, stop, delete), keeps
//! instance state consistent, and orchestrates infrastructure providers on their
//! behalf. Slow provider work runs in background tasks; providers report back
//! through a completion channel that the [`InfraEventListener`] consumes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   API layer (out of crate)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ action()
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GitspaceService                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Authorizer │ │ Busy guard  │ │ Lifecycle           │    │
//! │  │             │ │             │ │ state machine       │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ BackgroundTasks::spawn
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      InfraProvisioner                        │
//! │   trigger_infra_event ──▶ InfraProviderFactory ──▶ provider  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ InfraEventReport (mpsc)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   InfraEventListener ──▶ post_infra_event_complete           │
//! │                      ──▶ GitspaceResumer (resume_*)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                     ┌──────────────────┐
//!                     │  Store (RocksDB) │
//!                     └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gitspace_control::{
//!     ActionRequest, AllowAllAuthorizer, AuthSession, BackgroundTasks, ControlConfig,
//!     EventMessages, GitspaceActionType, GitspaceActions, GitspaceService, InfraProvisioner,
//!     StoreEventEmitter,
//! };
//! use gitspace_infra::InfraProviderFactory;
//! use gitspace_store::RocksStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/gitspace")?);
//! let config = ControlConfig::default();
//! let factory = InfraProviderFactory::builder().build();
//!
//! let provisioner = Arc::new(InfraProvisioner::new(store.clone(), factory, config.clone()));
//! let emitter = Arc::new(StoreEventEmitter::new(store.clone(), Arc::new(EventMessages::new())));
//! let tasks = BackgroundTasks::new(config.max_background_tasks, CancellationToken::new());
//! let service = GitspaceService::new(
//!     store,
//!     provisioner,
//!     Arc::new(AllowAllAuthorizer),
//!     emitter,
//!     tasks,
//!     config,
//! );
//!
//! let request = ActionRequest::new(GitspaceActionType::Start, "acme", "my-gitspace");
//! let gitspace = service.action(&AuthSession::new("alice"), request).await?;
//! println!("{} is {:?}", gitspace.identifier, gitspace.state);
//! # Ok(())
//! # }
//! ```
//!
//! See the [`lifecycle`] module for the instance state machine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod authz;
pub mod completion;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod listener;
pub mod provisioner;
pub mod resume;
pub mod service;
pub mod tasks;
pub mod types;

pub use authz::{AllowAllAuthorizer, AuthSession, Authorizer, AuthzError, Permission};
pub use error::{ControlError, Result};
pub use events::{
    EventEmitter, EventMessages, GitspaceEvent, GitspaceEventType, StoreEventEmitter,
};
pub use listener::InfraEventListener;
pub use provisioner::InfraProvisioner;
pub use resume::{ide_url, GitspaceResumer};
pub use service::{GitspaceActions, GitspaceService};
pub use tasks::BackgroundTasks;
pub use types::{ide_ports, ActionRequest, ControlConfig, GitspaceActionType, InfraEventOpts};

#[cfg(any(test, feature = "test-utils"))]
pub use authz::mock::MockAuthorizer;

// Re-export commonly used types from dependencies for convenience
pub use gitspace_core::{GitspaceConfigId, GitspaceInstanceId, SpaceId};
pub use gitspace_store::{GitspaceConfig, GitspaceInstance, GitspaceInstanceState, GitspaceState};
