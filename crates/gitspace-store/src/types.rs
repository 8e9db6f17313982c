//! Domain types stored in the database.
//!
//! These types represent the persisted state of spaces, gitspace configs and
//! instances, infrastructure provider definitions, provisioned-infrastructure
//! records and domain events.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use gitspace_core::{
    GitspaceConfigId, GitspaceEventId, GitspaceInstanceId, InfraProviderConfigId,
    InfraProviderResourceId, InfraProviderTemplateId, InfraProvisionedId, SpaceId,
};
use serde::{Deserialize, Serialize};

/// Free-form metadata attached to an infrastructure provider configuration.
///
/// Passed verbatim to every provider call.
pub type ConfigMetadata = BTreeMap<String, serde_json::Value>;

// =============================================================================
// Spaces
// =============================================================================

/// A space, the tenant-level container that owns gitspaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    /// Unique identifier, allocated on create.
    pub id: SpaceId,
    /// Slash separated path, e.g. `acme/team`.
    pub path: String,
    /// Parent space, `None` for root spaces.
    pub parent_id: Option<SpaceId>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
}

// =============================================================================
// Gitspace configs and instances
// =============================================================================

/// IDE flavour a gitspace is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeType {
    /// Desktop VS Code over SSH.
    VsCode,
    /// Browser based VS Code.
    VsCodeWeb,
    /// `JetBrains` `IntelliJ` via gateway.
    Intellij,
}

impl IdeType {
    /// Stable string form used in URLs and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VsCode => "vs_code",
            Self::VsCodeWeb => "vs_code_web",
            Self::Intellij => "intellij",
        }
    }
}

/// How a user authenticates against a running gitspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitspaceAccessType {
    /// Short lived token embedded in the IDE URL.
    JwtToken,
    /// Username and password.
    UserCredentials,
    /// User supplied SSH public key.
    SshKey,
}

/// High-level state of a gitspace config, derived from its latest instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GitspaceState {
    /// No instance has ever been started.
    #[default]
    Uninitialized,
    /// Infrastructure is being provisioned.
    Starting,
    /// The gitspace is usable.
    Running,
    /// Infrastructure is being stopped.
    Stopping,
    /// Not running; can be restarted.
    Stopped,
    /// The last operation failed.
    Error,
}

/// Lifecycle state of a single gitspace instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitspaceInstanceState {
    /// Row created, nothing triggered yet.
    Uninitialized,
    /// Provisioning in progress.
    Starting,
    /// Provisioned and usable.
    Running,
    /// Stop in progress.
    Stopping,
    /// Stopped, user data preserved.
    Stopped,
    /// An operation failed or the instance was stuck.
    Error,
    /// Deprovisioning in progress as part of delete.
    Deleting,
    /// Deprovisioned as part of delete.
    Deleted,
    /// Instance scoped resources were released.
    Cleaned,
}

impl GitspaceInstanceState {
    /// Stable string form used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Cleaned => "cleaned",
        }
    }
}

impl fmt::Display for GitspaceInstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository a gitspace is created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRepo {
    /// Clone URL.
    pub url: String,
    /// Branch to check out.
    pub branch: String,
    /// Path of the devcontainer definition inside the repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devcontainer_path: Option<String>,
}

impl CodeRepo {
    /// Repository name, the last path segment of the URL without `.git`.
    #[must_use]
    pub fn name(&self) -> &str {
        let trimmed = self.url.trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        last.strip_suffix(".git").unwrap_or(last)
    }
}

/// A user-authored gitspace definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitspaceConfig {
    /// Unique identifier, allocated on create.
    pub id: GitspaceConfigId,
    /// Identifier, unique within the owning space.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Owning space.
    pub space_id: SpaceId,
    /// Path of the owning space at creation time.
    pub space_path: String,
    /// IDE the gitspace is opened with.
    pub ide: IdeType,
    /// Source repository.
    pub code_repo: CodeRepo,
    /// Resource describing where and how much to provision.
    pub infra_provider_resource_id: InfraProviderResourceId,
    /// Derived high-level state, refreshed whenever the latest instance changes.
    pub state: GitspaceState,
    /// Owning user.
    pub user_id: String,
    /// Reference to a user SSH key, used for SSH based IDEs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_token_identifier: Option<String>,
    /// Soft-delete requested; cleanup may still be in progress.
    pub is_marked_for_deletion: bool,
    /// Soft-delete completed.
    pub is_deleted: bool,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated: DateTime<Utc>,
    /// Latest instance, attached on load. Never persisted with the config.
    #[serde(skip)]
    pub instance: Option<GitspaceInstance>,
}

/// One concrete instantiation of a gitspace config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitspaceInstance {
    /// Unique identifier, allocated on create.
    pub id: GitspaceInstanceId,
    /// Config this instance realizes.
    pub gitspace_config_id: GitspaceConfigId,
    /// Config identifier plus random suffix.
    pub identifier: String,
    /// Current lifecycle state.
    pub state: GitspaceInstanceState,
    /// IDE URL once running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Authentication flavour for this instance.
    pub access_type: GitspaceAccessType,
    /// Reference to the credential (token id, key id, password ref).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_ref: Option<String>,
    /// User the IDE logs in as inside the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_user: Option<String>,
    /// Owning space.
    pub space_id: SpaceId,
    /// Path of the owning space.
    pub space_path: String,
    /// Last time the IDE was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    /// Last heartbeat received from the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Start of the current active window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_time_started: Option<DateTime<Utc>>,
    /// End of the last active window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_time_ended: Option<DateTime<Utc>>,
    /// Accumulated active time in milliseconds.
    pub total_time_used_ms: i64,
    /// Error message when the instance is in `Error` state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last modification timestamp. Drives the busy guard.
    pub updated: DateTime<Utc>,
}

// =============================================================================
// Infrastructure providers
// =============================================================================

/// Backend kind an infrastructure provider talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraProviderType {
    /// A Docker engine that is already running.
    Docker,
    /// Customer managed VMs on GCP.
    HybridVmGcp,
    /// Customer managed VMs on AWS.
    HybridVmAws,
}

impl InfraProviderType {
    /// Stable string form used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::HybridVmGcp => "hybrid_vm_gcp",
            Self::HybridVmAws => "hybrid_vm_aws",
        }
    }

    /// Whether the provider runs customer managed VMs reachable through a gateway.
    #[must_use]
    pub const fn is_hybrid_vm(self) -> bool {
        matches!(self, Self::HybridVmGcp | Self::HybridVmAws)
    }
}

impl fmt::Display for InfraProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to provision: one configured backend of a given provider type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraProviderConfig {
    /// Unique identifier, allocated on create.
    pub id: InfraProviderConfigId,
    /// Identifier, unique within the owning space.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Owning space.
    pub space_id: SpaceId,
    /// Provider type.
    pub provider_type: InfraProviderType,
    /// Provider specific metadata handed to every provider call.
    #[serde(default)]
    pub metadata: ConfigMetadata,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated: DateTime<Utc>,
}

/// How much to provision: a sized resource offered by a provider config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraProviderResource {
    /// Unique identifier, allocated on create.
    pub id: InfraProviderResourceId,
    /// Identifier, unique within the owning provider config.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Provider config offering this resource.
    pub infra_provider_config_id: InfraProviderConfigId,
    /// Owning space.
    pub space_id: SpaceId,
    /// Provider type, denormalized from the config.
    pub provider_type: InfraProviderType,
    /// CPU hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Disk hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,
    /// Network hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Region hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Gateway host fronting the provisioned machines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_host: Option<String>,
    /// Gateway port fronting the provisioned machines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_port: Option<String>,
    /// Template supplying extra provisioning parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_identifier: Option<String>,
    /// Literal provisioning parameters.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated: DateTime<Utc>,
}

/// A named parameter template owned by a provider config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraProviderTemplate {
    /// Unique identifier, allocated on create.
    pub id: InfraProviderTemplateId,
    /// Identifier, unique within the owning space.
    pub identifier: String,
    /// Provider config the template belongs to.
    pub infra_provider_config_id: InfraProviderConfigId,
    /// Owning space.
    pub space_id: SpaceId,
    /// Raw template data: a JSON list of `{name, value}` parameters.
    pub data: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated: DateTime<Utc>,
}

/// One `{name, value}` provisioning parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InfraProviderParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

impl InfraProviderParameter {
    /// Build a parameter from anything string-like.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// =============================================================================
// Provisioned infrastructure
// =============================================================================

/// Status of provisioned infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraStatus {
    /// Provisioning was requested and has not completed.
    Pending,
    /// Provisioned and reachable.
    Provisioned,
    /// Stopped with user data preserved.
    Stopped,
    /// All resources released.
    Destroyed,
    /// Outcome unknown, e.g. after a failed or abandoned attempt.
    Unknown,
    /// The provider reported a failure.
    Error,
}

impl InfraStatus {
    /// Stable string form used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioned => "provisioned",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
            Self::Unknown => "unknown",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for InfraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable, resumable record of one provisioning attempt for an instance.
///
/// The latest record per instance is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraProvisioned {
    /// Unique identifier, allocated on create. Increases per attempt.
    pub id: InfraProvisionedId,
    /// Instance this record belongs to.
    pub gitspace_instance_id: GitspaceInstanceId,
    /// Provider type used.
    pub infra_provider_type: InfraProviderType,
    /// Resource used.
    pub infra_provider_resource_id: InfraProviderResourceId,
    /// Owning space.
    pub space_id: SpaceId,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last modification timestamp. Drives the pending window.
    pub updated: DateTime<Utc>,
    /// JSON serialized infrastructure descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_metadata: Option<String>,
    /// JSON serialized `{name, value}` parameter list.
    pub input_params: String,
    /// Current status.
    pub infra_status: InfraStatus,
    /// Host the agent is reachable on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_host_ip: Option<String>,
    /// Port the agent is reachable on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_host_port: Option<String>,
    /// Proxy host fronting the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_host: Option<String>,
    /// Proxy port fronting the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<i32>,
    /// Gateway host fronting the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_host: Option<String>,
}

// =============================================================================
// Events
// =============================================================================

/// Kind of entity an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitspaceEntityType {
    /// A gitspace config.
    GitspaceConfig,
    /// A gitspace instance.
    GitspaceInstance,
}

/// A persisted domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitspaceEventRecord {
    /// Unique identifier, allocated on create.
    pub id: GitspaceEventId,
    /// Raw id of the entity the event refers to.
    pub entity_id: i64,
    /// Kind of entity the event refers to.
    pub entity_type: GitspaceEntityType,
    /// Event type, e.g. `infra_provisioning_start`.
    pub event: String,
    /// Config identifier the event belongs to, used for listing.
    pub query_key: String,
    /// Time the event was emitted.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_name_from_url() {
        let repo = CodeRepo {
            url: "https://git.example.com/acme/widgets.git".to_string(),
            branch: "main".to_string(),
            devcontainer_path: None,
        };
        assert_eq!(repo.name(), "widgets");

        let repo = CodeRepo {
            url: "https://git.example.com/acme/tools/".to_string(),
            branch: "main".to_string(),
            devcontainer_path: None,
        };
        assert_eq!(repo.name(), "tools");
    }

    #[test]
    fn hybrid_vm_detection() {
        assert!(!InfraProviderType::Docker.is_hybrid_vm());
        assert!(InfraProviderType::HybridVmGcp.is_hybrid_vm());
        assert!(InfraProviderType::HybridVmAws.is_hybrid_vm());
    }

    #[test]
    fn states_serialize_snake_case() {
        let json = serde_json::to_string(&GitspaceInstanceState::Uninitialized).unwrap();
        assert_eq!(json, "\"uninitialized\"");
        let json = serde_json::to_string(&InfraStatus::Provisioned).unwrap();
        assert_eq!(json, "\"provisioned\"");
    }
}
