//! Types for the infra crate.

use std::collections::BTreeMap;
use std::fmt;

use gitspace_core::{GitspaceInstanceId, SpaceId};
use gitspace_store::{ConfigMetadata, InfraProviderParameter, InfraProviderType, InfraStatus};
use serde::{Deserialize, Serialize};

/// Whether a provider creates fresh resources per instance or reuses a running backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningType {
    /// Fresh resources per instance, tracked in a provisioned record.
    New,
    /// An already running backend is reused; nothing is tracked.
    Existing,
}

/// Infrastructure operation a trigger dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraEvent {
    /// Provision infrastructure for an instance.
    Provision,
    /// Stop infrastructure, preserving user data.
    Stop,
    /// Release all infrastructure of a gitspace.
    Deprovision,
    /// Release resources scoped to one instance.
    Cleanup,
}

impl InfraEvent {
    /// Stable string form used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Stop => "stop",
            Self::Deprovision => "deprovision",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for InfraEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol spoken on a gitspace port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortProtocol {
    /// HTTP, e.g. the browser IDE.
    Http,
    /// SSH, e.g. desktop IDEs.
    Ssh,
}

/// A port the gitspace needs exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitspacePort {
    /// Port inside the gitspace.
    pub port: u16,
    /// Protocol spoken on the port.
    pub protocol: PortProtocol,
}

/// Mapping of one gitspace port onto the host.
///
/// Zero means "not yet assigned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port published on the host.
    pub published_port: u16,
    /// Port forwarded to inside the gitspace.
    pub forwarded_port: u16,
}

/// Identity of the machine or engine backing a gitspace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Machine, VM or engine id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Machine or engine name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Operating system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// CPU architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// PEM encoded certificate the agent presents for mTLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_tls_cert: Option<String>,
}

/// Transient descriptor of provisioned infrastructure.
///
/// Produced by providers and persisted only as JSON inside a provisioned record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infrastructure {
    /// Instance identifier the infrastructure was provisioned for.
    pub identifier: String,
    /// Owning space.
    pub space_id: SpaceId,
    /// Owning space path.
    pub space_path: String,
    /// Config identifier.
    pub gitspace_config_identifier: String,
    /// Instance the infrastructure belongs to.
    pub gitspace_instance_id: GitspaceInstanceId,
    /// Provider that produced this descriptor.
    pub provider_type: InfraProviderType,
    /// Parameters used to provision.
    #[serde(default)]
    pub input_parameters: Vec<InfraProviderParameter>,
    /// Host the agent is reachable on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_host: Option<String>,
    /// Port the agent listens on, zero for reused infrastructure.
    #[serde(default)]
    pub agent_port: u16,
    /// Proxy host fronting the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_agent_host: Option<String>,
    /// Proxy port fronting the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_agent_port: Option<u16>,
    /// Gateway host fronting the machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_host: Option<String>,
    /// Name of the storage object holding user data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_identifier: Option<String>,
    /// Host mappings keyed by gitspace port.
    #[serde(default)]
    pub port_mappings: BTreeMap<u16, PortMapping>,
    /// Identity of the backing machine.
    #[serde(default)]
    pub instance_info: InstanceInfo,
    /// Routing key used by the SSH piper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    /// Current status.
    pub status: InfraStatus,
}

impl Infrastructure {
    /// Host a client should connect to, preferring the proxy.
    #[must_use]
    pub fn connect_host(&self) -> Option<&str> {
        self.proxy_agent_host
            .as_deref()
            .or(self.agent_host.as_deref())
    }

    /// Serialize the descriptor for a provisioned record.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a descriptor stored in a provisioned record.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid descriptor.
    pub fn from_json(data: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Arguments of [`InfraProvider::provision`](crate::InfraProvider::provision).
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Owning space.
    pub space_id: SpaceId,
    /// Owning space path.
    pub space_path: String,
    /// Config identifier.
    pub gitspace_config_identifier: String,
    /// Instance identifier.
    pub gitspace_instance_identifier: String,
    /// Instance id.
    pub gitspace_instance_id: GitspaceInstanceId,
    /// Port the agent should listen on. Zero for reused infrastructure.
    pub agent_port: u16,
    /// Ports the gitspace needs exposed.
    pub required_ports: Vec<GitspacePort>,
    /// Validated provisioning parameters.
    pub input_params: Vec<InfraProviderParameter>,
    /// Metadata of the provider config.
    pub config_metadata: ConfigMetadata,
    /// Previously stopped infrastructure to resume, if any.
    pub existing_infra: Option<Infrastructure>,
    /// Routing key to carry into the produced descriptor.
    pub routing_key: Option<String>,
}

/// Arguments of [`InfraProvider::find`](crate::InfraProvider::find).
#[derive(Debug, Clone)]
pub struct FindRequest {
    /// Owning space.
    pub space_id: SpaceId,
    /// Owning space path.
    pub space_path: String,
    /// Config identifier.
    pub gitspace_config_identifier: String,
    /// Instance identifier.
    pub gitspace_instance_identifier: String,
    /// Instance id.
    pub gitspace_instance_id: GitspaceInstanceId,
    /// Provisioning parameters.
    pub input_params: Vec<InfraProviderParameter>,
}

/// Schema entry describing a parameter a provider understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Value used when the parameter is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Whether the parameter must be supplied.
    pub required: bool,
    /// Whether users may change the value after creation.
    pub editable: bool,
}

/// Completion report a provider emits when an operation finishes.
#[derive(Debug, Clone)]
pub struct InfraEventReport {
    /// Operation that finished.
    pub event: InfraEvent,
    /// Resulting infrastructure.
    pub infra: Infrastructure,
    /// Failure description when the operation did not succeed.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Infrastructure {
        Infrastructure {
            identifier: "ws-1-abc123".to_string(),
            space_id: SpaceId::new(1),
            space_path: "acme/team".to_string(),
            gitspace_config_identifier: "ws-1".to_string(),
            gitspace_instance_id: GitspaceInstanceId::new(3),
            provider_type: InfraProviderType::Docker,
            input_parameters: vec![InfraProviderParameter::new("image", "ubuntu")],
            agent_host: Some("10.0.0.5".to_string()),
            agent_port: 8083,
            proxy_agent_host: None,
            proxy_agent_port: None,
            gateway_host: None,
            storage_identifier: Some("gitspace-acme-team-ws-1".to_string()),
            port_mappings: [(8089, PortMapping::default())].into_iter().collect(),
            instance_info: InstanceInfo::default(),
            routing_key: None,
            status: InfraStatus::Provisioned,
        }
    }

    #[test]
    fn descriptor_survives_json() {
        let infra = sample();
        let json = infra.to_json().unwrap();
        assert_eq!(Infrastructure::from_json(&json).unwrap(), infra);
    }

    #[test]
    fn connect_host_prefers_proxy() {
        let mut infra = sample();
        assert_eq!(infra.connect_host(), Some("10.0.0.5"));
        infra.proxy_agent_host = Some("proxy.internal".to_string());
        assert_eq!(infra.connect_host(), Some("proxy.internal"));
    }
}
