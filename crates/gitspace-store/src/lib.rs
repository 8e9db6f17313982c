//! `RocksDB` storage layer for the gitspace orchestrator.
//!
//! This crate provides persistent storage for gitspace configs and instances,
//! infrastructure provider definitions, provisioned-infrastructure records and
//! domain events, using `RocksDB` column families for indexing.
//!
//! # Architecture
//!
//! ```text
//!  spaces ──< gitspace_configs ──< gitspace_instances ──< infra_provisioned
//!                   │                                         (latest wins)
//!                   └──> infra_provider_resources ──> infra_provider_configs
//!                                     └──> infra_provider_templates
//! ```
//!
//! Column families:
//!
//! - `gitspace_configs` / `gitspace_configs_by_identifier`: configs and their
//!   per-space identifier index
//! - `gitspace_instances` / `gitspace_instances_by_config`: instances, scanned
//!   per config in allocation order
//! - `infra_provisioned` / `infra_provisioned_by_instance`: provisioning records,
//!   the last key under an instance prefix is the latest record
//! - `sequences`: monotonically increasing id counters
//!
//! # Example
//!
//! ```no_run
//! use gitspace_store::{RocksStore, Store};
//! use gitspace_core::GitspaceConfigId;
//!
//! let store = RocksStore::open("/tmp/gitspace-db").unwrap();
//! let latest = store
//!     .find_latest_gitspace_instance(GitspaceConfigId::new(1))
//!     .unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    CodeRepo, ConfigMetadata, GitspaceAccessType, GitspaceConfig, GitspaceEntityType,
    GitspaceEventRecord, GitspaceInstance, GitspaceInstanceState, GitspaceState, IdeType,
    InfraProviderConfig, InfraProviderParameter, InfraProviderResource, InfraProviderTemplate,
    InfraProviderType, InfraProvisioned, InfraStatus, Space,
};

use gitspace_core::{
    GitspaceConfigId, GitspaceInstanceId, InfraProviderConfigId, InfraProviderResourceId,
    InfraProvisionedId, SpaceId,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing). `create_*` methods allocate the id and
/// write it back into the record; `update_*` methods overwrite an existing record
/// (last write wins).
pub trait Store: Send + Sync {
    // =========================================================================
    // Space Operations
    // =========================================================================

    /// Create a space, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the path is taken.
    fn create_space(&self, space: &mut Space) -> Result<()>;

    /// Get a space by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_space(&self, space_id: SpaceId) -> Result<Option<Space>>;

    /// Resolve a space by its path. Leading and trailing slashes are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_space_by_path(&self, path: &str) -> Result<Option<Space>>;

    // =========================================================================
    // Gitspace Config Operations
    // =========================================================================

    /// Create a gitspace config, assigning its id.
    ///
    /// The latest instance attached to the config is not persisted.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the identifier is taken in the space.
    fn create_gitspace_config(&self, config: &mut GitspaceConfig) -> Result<()>;

    /// Overwrite an existing gitspace config.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the config doesn't exist.
    fn update_gitspace_config(&self, config: &GitspaceConfig) -> Result<()>;

    /// Get a gitspace config by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_gitspace_config(&self, config_id: GitspaceConfigId) -> Result<Option<GitspaceConfig>>;

    /// Find a gitspace config by its identifier within a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_gitspace_config_by_identifier(
        &self,
        space_id: SpaceId,
        identifier: &str,
    ) -> Result<Option<GitspaceConfig>>;

    /// List all gitspace configs.
    ///
    /// Use with caution in production; prefer filtered queries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_all_gitspace_configs(&self) -> Result<Vec<GitspaceConfig>>;

    // =========================================================================
    // Gitspace Instance Operations
    // =========================================================================

    /// Create a gitspace instance, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn create_gitspace_instance(&self, instance: &mut GitspaceInstance) -> Result<()>;

    /// Overwrite an existing gitspace instance.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the instance doesn't exist.
    fn update_gitspace_instance(&self, instance: &GitspaceInstance) -> Result<()>;

    /// Get a gitspace instance by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_gitspace_instance(
        &self,
        instance_id: GitspaceInstanceId,
    ) -> Result<Option<GitspaceInstance>>;

    /// Find the most recently created instance of a config.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_latest_gitspace_instance(
        &self,
        config_id: GitspaceConfigId,
    ) -> Result<Option<GitspaceInstance>>;

    /// List all instances of a config, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_gitspace_instances_by_config(
        &self,
        config_id: GitspaceConfigId,
    ) -> Result<Vec<GitspaceInstance>>;

    // =========================================================================
    // Infra Provider Operations
    // =========================================================================

    /// Create a provider config, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn create_infra_provider_config(&self, config: &mut InfraProviderConfig) -> Result<()>;

    /// Get a provider config by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_infra_provider_config(
        &self,
        config_id: InfraProviderConfigId,
    ) -> Result<Option<InfraProviderConfig>>;

    /// Create a provider resource, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn create_infra_provider_resource(&self, resource: &mut InfraProviderResource) -> Result<()>;

    /// Get a provider resource by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_infra_provider_resource(
        &self,
        resource_id: InfraProviderResourceId,
    ) -> Result<Option<InfraProviderResource>>;

    /// Create a provider template, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the identifier is taken in the space.
    fn create_infra_provider_template(&self, template: &mut InfraProviderTemplate) -> Result<()>;

    /// Find a provider template by its identifier within a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_infra_provider_template(
        &self,
        space_id: SpaceId,
        identifier: &str,
    ) -> Result<Option<InfraProviderTemplate>>;

    // =========================================================================
    // Infra Provisioned Operations
    // =========================================================================

    /// Create a provisioned record, assigning its id.
    ///
    /// The new record becomes the latest record of its instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn create_infra_provisioned(&self, record: &mut InfraProvisioned) -> Result<()>;

    /// Overwrite an existing provisioned record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    fn update_infra_provisioned(&self, record: &InfraProvisioned) -> Result<()>;

    /// Get a provisioned record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_infra_provisioned(
        &self,
        record_id: InfraProvisionedId,
    ) -> Result<Option<InfraProvisioned>>;

    /// Find the latest provisioned record of an instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_latest_infra_provisioned(
        &self,
        instance_id: GitspaceInstanceId,
    ) -> Result<Option<InfraProvisioned>>;

    /// List all provisioned records of an instance, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_infra_provisioned_by_instance(
        &self,
        instance_id: GitspaceInstanceId,
    ) -> Result<Vec<InfraProvisioned>>;

    /// Delete a provisioned record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    fn delete_infra_provisioned(&self, record_id: InfraProvisionedId) -> Result<()>;

    // =========================================================================
    // Event Operations
    // =========================================================================

    /// Append a domain event, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn create_gitspace_event(&self, event: &mut GitspaceEventRecord) -> Result<()>;

    /// List the events of an entity, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_gitspace_events(
        &self,
        entity_type: GitspaceEntityType,
        entity_id: i64,
    ) -> Result<Vec<GitspaceEventRecord>>;
}
