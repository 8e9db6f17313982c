//! Completion handling for provider operations.
//!
//! This is the only path by which a transient [`Infrastructure`] descriptor
//! becomes durable. Repeated completions overwrite the same fields.

use chrono::Utc;
use gitspace_core::GitspaceInstanceId;
use gitspace_infra::{InfraEvent, Infrastructure, ProvisioningType};
use gitspace_store::{GitspaceConfig, Store};
use tracing::debug;

use crate::error::{ControlError, Result};
use crate::provisioner::InfraProvisioner;

impl<S: Store> InfraProvisioner<S> {
    /// Record the outcome of a finished provider operation.
    ///
    /// No-op for `Existing` providers, which keep no durable record.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be resolved or the record update fails.
    pub fn post_infra_event_complete(
        &self,
        config: &GitspaceConfig,
        infra: &Infrastructure,
        event: InfraEvent,
    ) -> Result<()> {
        let provider = self.factory.get(infra.provider_type)?;
        if provider.provisioning_type() == ProvisioningType::Existing {
            return Ok(());
        }

        debug!(
            gitspace = %config.identifier,
            event = %event,
            status = %infra.status,
            "Recording infra event completion"
        );

        match event {
            InfraEvent::Provision
            | InfraEvent::Deprovision
            | InfraEvent::Stop
            | InfraEvent::Cleanup => self.update_infra_provisioned(infra.gitspace_instance_id, infra),
        }
    }

    /// Overwrite the latest record of an instance with a reported descriptor.
    ///
    /// # Errors
    ///
    /// Returns `InfraNotFound` if the instance has no record.
    pub fn update_infra_provisioned(
        &self,
        instance_id: GitspaceInstanceId,
        infra: &Infrastructure,
    ) -> Result<()> {
        let mut record = self
            .store
            .find_latest_infra_provisioned(instance_id)?
            .ok_or(ControlError::InfraNotFound(instance_id))?;

        record.infra_status = infra.status;
        record.server_host_ip.clone_from(&infra.agent_host);
        record.server_host_port = Some(infra.agent_port.to_string());
        record.proxy_host.clone_from(&infra.proxy_agent_host);
        record.proxy_port = infra.proxy_agent_port.map(i32::from);
        if infra.gateway_host.is_some() {
            record.gateway_host.clone_from(&infra.gateway_host);
        }
        record.response_metadata = Some(infra.to_json()?);
        record.updated = Utc::now();

        self.store.update_infra_provisioned(&record)?;
        Ok(())
    }
}
