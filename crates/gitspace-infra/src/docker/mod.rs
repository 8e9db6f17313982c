//! Docker reference provider.
//!
//! Treats an already running Docker engine as the infrastructure, so the
//! provisioning type is [`ProvisioningType::Existing`]. The only resource it
//! owns is the named volume holding a gitspace's user data:
//!
//! | event       | effect                                             |
//! |-------------|----------------------------------------------------|
//! | provision   | create volume, report engine identity, `Provisioned` |
//! | stop        | nothing released, `Stopped`                        |
//! | deprovision | remove volume if allowed, `Destroyed`              |
//! | cleanup     | nothing instance scoped to release, `Stopped`      |

pub mod engine;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use gitspace_store::{
    ConfigMetadata, GitspaceConfig, InfraProviderConfig, InfraProviderParameter,
    InfraProviderType, InfraStatus,
};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::provider::InfraProvider;
use crate::sink::InfraEventSink;
use crate::types::{
    FindRequest, InfraEvent, InfraEventReport, Infrastructure, InstanceInfo, ParameterSchema,
    PortMapping, ProvisionRequest, ProvisioningType,
};
use crate::{InfraError, Result};

pub use engine::{BollardEngine, DockerEngine};

#[cfg(any(test, feature = "test-utils"))]
pub use engine::memory::MemoryDockerEngine;

/// Label carrying the owning space id on created volumes.
pub const SPACE_LABEL: &str = "gitspace.space_id";

/// Label carrying the config identifier on created volumes.
pub const CONFIG_LABEL: &str = "gitspace.config_identifier";

/// Derive the volume name for a gitspace.
///
/// `volume_name("/acme/team", "ws-1")` is `gitspace-acme-team-ws-1`.
#[must_use]
pub fn volume_name(space_path: &str, resource_key: &str) -> String {
    format!(
        "gitspace-{}-{}",
        space_path.trim_matches('/').replace('/', "-"),
        resource_key
    )
}

/// Configuration for the Docker provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerProviderConfig {
    /// Explicit engine socket; `None` uses `DOCKER_HOST` or the platform default.
    pub socket_path: Option<String>,
    /// Host clients use to reach containers on this engine.
    pub advertised_host: String,
}

impl Default for DockerProviderConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            advertised_host: "localhost".to_string(),
        }
    }
}

impl DockerProviderConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `GITSPACE_DOCKER_SOCKET`: Path of the engine socket
    /// - `GITSPACE_DOCKER_ADVERTISED_HOST`: Host clients connect to
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GITSPACE_DOCKER_SOCKET") {
            config.socket_path = Some(val);
        }
        if let Ok(val) = std::env::var("GITSPACE_DOCKER_ADVERTISED_HOST") {
            config.advertised_host = val;
        }

        config
    }
}

/// Provider that reuses a running Docker engine.
pub struct DockerProvider {
    engine: Arc<dyn DockerEngine>,
    sink: Arc<dyn InfraEventSink>,
    config: DockerProviderConfig,
    host_info: OnceCell<InstanceInfo>,
}

impl DockerProvider {
    /// Create a provider on top of an engine.
    #[must_use]
    pub fn new(
        engine: Arc<dyn DockerEngine>,
        sink: Arc<dyn InfraEventSink>,
        config: DockerProviderConfig,
    ) -> Self {
        Self {
            engine,
            sink,
            config,
            host_info: OnceCell::new(),
        }
    }

    /// Engine identity, introspected once and cached.
    async fn host_info(&self) -> Result<InstanceInfo> {
        self.host_info
            .get_or_try_init(|| self.engine.host_info())
            .await
            .cloned()
    }

    fn report(&self, event: InfraEvent, infra: Infrastructure) {
        self.sink.emit(InfraEventReport {
            event,
            infra,
            error: None,
        });
    }
}

#[async_trait]
impl InfraProvider for DockerProvider {
    fn provider_type(&self) -> InfraProviderType {
        InfraProviderType::Docker
    }

    fn provisioning_type(&self) -> ProvisioningType {
        ProvisioningType::Existing
    }

    async fn provision(&self, request: ProvisionRequest) -> Result<()> {
        let volume = volume_name(&request.space_path, &request.gitspace_config_identifier);
        let labels = HashMap::from([
            (SPACE_LABEL.to_string(), request.space_id.to_string()),
            (
                CONFIG_LABEL.to_string(),
                request.gitspace_config_identifier.clone(),
            ),
        ]);
        self.engine.create_volume(&volume, labels).await?;
        let instance_info = self.host_info().await?;

        let port_mappings: BTreeMap<u16, PortMapping> = request
            .required_ports
            .iter()
            .map(|port| (port.port, PortMapping::default()))
            .collect();

        info!(
            gitspace_instance_id = %request.gitspace_instance_id,
            volume = %volume,
            resumed = request.existing_infra.is_some(),
            "Provisioned docker infrastructure"
        );

        let infra = Infrastructure {
            identifier: request.gitspace_instance_identifier,
            space_id: request.space_id,
            space_path: request.space_path,
            gitspace_config_identifier: request.gitspace_config_identifier,
            gitspace_instance_id: request.gitspace_instance_id,
            provider_type: InfraProviderType::Docker,
            input_parameters: request.input_params,
            agent_host: Some(self.config.advertised_host.clone()),
            agent_port: request.agent_port,
            proxy_agent_host: None,
            proxy_agent_port: None,
            gateway_host: None,
            storage_identifier: Some(volume),
            port_mappings,
            instance_info,
            routing_key: request.routing_key,
            status: InfraStatus::Provisioned,
        };
        self.report(InfraEvent::Provision, infra);
        Ok(())
    }

    async fn find(&self, request: FindRequest) -> Result<Option<Infrastructure>> {
        let volume = volume_name(&request.space_path, &request.gitspace_config_identifier);
        if !self.engine.volume_exists(&volume).await? {
            return Ok(None);
        }
        let instance_info = self.host_info().await?;

        Ok(Some(Infrastructure {
            identifier: request.gitspace_instance_identifier,
            space_id: request.space_id,
            space_path: request.space_path,
            gitspace_config_identifier: request.gitspace_config_identifier,
            gitspace_instance_id: request.gitspace_instance_id,
            provider_type: InfraProviderType::Docker,
            input_parameters: request.input_params,
            agent_host: Some(self.config.advertised_host.clone()),
            agent_port: 0,
            proxy_agent_host: None,
            proxy_agent_port: None,
            gateway_host: None,
            storage_identifier: Some(volume),
            port_mappings: BTreeMap::new(),
            instance_info,
            routing_key: None,
            status: InfraStatus::Provisioned,
        }))
    }

    async fn stop(
        &self,
        infra: &Infrastructure,
        _config: &GitspaceConfig,
        _config_metadata: &ConfigMetadata,
    ) -> Result<()> {
        let mut stopped = infra.clone();
        stopped.status = InfraStatus::Stopped;
        self.report(InfraEvent::Stop, stopped);
        Ok(())
    }

    async fn deprovision(
        &self,
        infra: &Infrastructure,
        config: &GitspaceConfig,
        can_delete_user_data: bool,
        _config_metadata: &ConfigMetadata,
        _params: &[InfraProviderParameter],
    ) -> Result<()> {
        let volume = infra
            .storage_identifier
            .clone()
            .unwrap_or_else(|| volume_name(&config.space_path, &config.identifier));

        if can_delete_user_data {
            self.engine.remove_volume(&volume).await?;
            info!(volume = %volume, "Removed gitspace volume");
        } else {
            info!(volume = %volume, "Preserving gitspace volume");
        }

        let mut destroyed = infra.clone();
        destroyed.status = InfraStatus::Destroyed;
        self.report(InfraEvent::Deprovision, destroyed);
        Ok(())
    }

    async fn cleanup_instance_resources(&self, infra: &Infrastructure) -> Result<()> {
        let mut cleaned = infra.clone();
        if cleaned.status != InfraStatus::Destroyed {
            cleaned.status = InfraStatus::Stopped;
        }
        self.report(InfraEvent::Cleanup, cleaned);
        Ok(())
    }

    fn validate_params(&self, params: &[InfraProviderParameter]) -> Result<()> {
        if let Some(param) = params.iter().find(|p| p.name.trim().is_empty()) {
            return Err(InfraError::InvalidParams(format!(
                "parameter with value {:?} has an empty name",
                param.value
            )));
        }
        Ok(())
    }

    fn available_params(&self) -> Vec<ParameterSchema> {
        Vec::new()
    }

    fn template_params(&self) -> Vec<ParameterSchema> {
        Vec::new()
    }

    fn update_params(
        &self,
        params: &[InfraProviderParameter],
        _config_metadata: &ConfigMetadata,
    ) -> Result<Vec<InfraProviderParameter>> {
        Ok(params.to_vec())
    }

    fn validate_config(&self, config: &InfraProviderConfig) -> Result<()> {
        if config.provider_type != InfraProviderType::Docker {
            return Err(InfraError::InvalidConfig(format!(
                "expected a docker provider config, got {}",
                config.provider_type
            )));
        }
        Ok(())
    }

    fn update_config(&self, config: InfraProviderConfig) -> Result<InfraProviderConfig> {
        self.validate_config(&config)?;
        if !config.metadata.is_empty() {
            warn!(
                infra_provider_config = %config.identifier,
                "Docker provider ignores config metadata"
            );
        }
        Ok(config)
    }

    fn generate_setup_yaml(&self, _config: &InfraProviderConfig) -> Result<String> {
        Err(InfraError::Unsupported {
            provider: InfraProviderType::Docker,
            operation: "generate_setup_yaml",
        })
    }
}
