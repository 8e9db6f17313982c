//! Infrastructure orchestration.
//!
//! [`InfraProvisioner`] turns an [`InfraEvent`] on a gitspace into the right
//! provider call. It resolves the provider, assembles parameters from the store,
//! keeps the durable provisioned record of `New`-type providers in step with each
//! attempt, and guards against duplicate concurrent provisioning.
//!
//! # Provision flow (`New` providers)
//!
//! ```text
//! latest record ──▶ Pending & fresh? ──yes──▶ AlreadyProvisioning
//!        │                │ stale
//!        │                ▼
//!        │          flip to Unknown
//!        ▼
//! params ──▶ validate ──▶ insert Pending record ──▶ provider.provision()
//!                                                       │ sync error
//!                                                       ▼
//!                                              record → Unknown, return error
//! ```

use std::sync::Arc;

use chrono::Utc;
use gitspace_core::{naming, GitspaceInstanceId, InfraProvisionedId};
use gitspace_infra::{
    params_to_string, string_to_params, FindRequest, InfraEvent, InfraProvider,
    InfraProviderFactory, Infrastructure, ProvisionRequest, ProvisioningType,
};
use gitspace_store::{
    ConfigMetadata, GitspaceAccessType, GitspaceConfig, GitspaceInstance, InfraProviderParameter,
    InfraProviderResource, InfraProvisioned, InfraStatus, Store,
};
use tracing::{debug, error, info, warn};

use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::types::{ControlConfig, InfraEventOpts};

/// Dispatches infrastructure events to providers and tracks provisioned records.
pub struct InfraProvisioner<S: Store> {
    pub(crate) store: Arc<S>,
    pub(crate) factory: InfraProviderFactory,
    pub(crate) config: ControlConfig,
}

impl<S: Store> InfraProvisioner<S> {
    /// Create a provisioner.
    pub fn new(store: Arc<S>, factory: InfraProviderFactory, config: ControlConfig) -> Self {
        Self {
            store,
            factory,
            config,
        }
    }

    /// Trigger an infrastructure event with default options.
    ///
    /// # Errors
    ///
    /// See [`trigger_infra_event_with_opts`](Self::trigger_infra_event_with_opts).
    pub async fn trigger_infra_event(
        &self,
        event: InfraEvent,
        config: &GitspaceConfig,
        infra: Option<&Infrastructure>,
    ) -> Result<()> {
        self.trigger_infra_event_with_opts(event, config, infra, InfraEventOpts::default())
            .await
    }

    /// Trigger an infrastructure event.
    ///
    /// `config` must carry its latest instance for `Provision`. `infra` is required
    /// for every event except `Provision`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be resolved, parameters are invalid,
    /// a fresh provisioning attempt is still pending, or the provider call fails.
    pub async fn trigger_infra_event_with_opts(
        &self,
        event: InfraEvent,
        config: &GitspaceConfig,
        infra: Option<&Infrastructure>,
        opts: InfraEventOpts,
    ) -> Result<()> {
        let resource = self.resource(config)?;
        let provider = self.factory.get(resource.provider_type)?;

        debug!(
            gitspace = %config.identifier,
            event = %event,
            provider = %resource.provider_type,
            "Triggering infra event"
        );

        match event {
            InfraEvent::Provision => {
                let instance = config.instance.as_ref().ok_or_else(|| {
                    ControlError::Internal(format!(
                        "gitspace {} has no instance to provision",
                        config.identifier
                    ))
                })?;
                self.provision(provider.as_ref(), config, instance, &resource, opts)
                    .await
            }
            InfraEvent::Deprovision => {
                let infra = required_infra(infra, config, event)?;
                if provider.provisioning_type() == ProvisioningType::New {
                    if let Some(record) = self
                        .store
                        .find_latest_infra_provisioned(infra.gitspace_instance_id)?
                    {
                        if record.infra_status == InfraStatus::Destroyed {
                            info!(
                                gitspace_instance_id = %infra.gitspace_instance_id,
                                "Infrastructure already destroyed, skipping deprovision"
                            );
                            return Ok(());
                        }
                    }
                }
                let (params, config_metadata) = self.get_all_params_from_db(&resource)?;
                provider
                    .deprovision(
                        infra,
                        config,
                        opts.delete_user_data,
                        &config_metadata,
                        &params,
                    )
                    .await
                    .map_err(|source| ControlError::Provider { event, source })
            }
            InfraEvent::Stop => {
                let infra = required_infra(infra, config, event)?;
                let (_, config_metadata) = self.get_all_params_from_db(&resource)?;
                provider
                    .stop(infra, config, &config_metadata)
                    .await
                    .map_err(|source| ControlError::Provider { event, source })
            }
            InfraEvent::Cleanup => {
                let infra = required_infra(infra, config, event)?;
                provider
                    .cleanup_instance_resources(infra)
                    .await
                    .map_err(|source| ControlError::Provider { event, source })
            }
        }
    }

    async fn provision(
        &self,
        provider: &dyn InfraProvider,
        config: &GitspaceConfig,
        instance: &GitspaceInstance,
        resource: &InfraProviderResource,
        opts: InfraEventOpts,
    ) -> Result<()> {
        self.check_pending_provisioning(instance.id)?;

        let (params, config_metadata) = self.get_all_params_from_db(resource)?;
        provider.validate_params(&params)?;

        let existing_infra = match self.get_stopped_infra_from_stored_info(config) {
            Ok(infra) => infra,
            Err(e) => {
                info!(
                    gitspace_instance_id = %instance.id,
                    error = %e,
                    "No reusable stopped infrastructure"
                );
                None
            }
        };

        match provider.provisioning_type() {
            ProvisioningType::New => {
                self.provision_new_infrastructure(
                    provider,
                    config,
                    instance,
                    resource,
                    params,
                    config_metadata,
                    opts,
                    existing_infra,
                )
                .await
            }
            ProvisioningType::Existing => {
                let request = ProvisionRequest {
                    space_id: config.space_id,
                    space_path: config.space_path.clone(),
                    gitspace_config_identifier: config.identifier.clone(),
                    gitspace_instance_identifier: instance.identifier.clone(),
                    gitspace_instance_id: instance.id,
                    agent_port: 0,
                    required_ports: opts.required_ports,
                    input_params: params,
                    config_metadata,
                    existing_infra,
                    routing_key: None,
                };
                provider
                    .provision(request)
                    .await
                    .map_err(|source| ControlError::Provider {
                        event: InfraEvent::Provision,
                        source,
                    })
            }
        }
    }

    /// Reject a provision while a fresh attempt is pending; self-heal a stale one.
    fn check_pending_provisioning(&self, instance_id: GitspaceInstanceId) -> Result<()> {
        let Some(mut latest) = self.store.find_latest_infra_provisioned(instance_id)? else {
            return Ok(());
        };
        if latest.infra_status != InfraStatus::Pending {
            return Ok(());
        }
        if !lifecycle::is_stale(latest.updated, self.config.pending_provision_timeout()) {
            return Err(ControlError::AlreadyProvisioning(latest.id));
        }

        warn!(
            gitspace_instance_id = %instance_id,
            record_id = %latest.id,
            "Pending provisioning record is stale, marking unknown"
        );
        latest.infra_status = InfraStatus::Unknown;
        latest.updated = Utc::now();
        self.store.update_infra_provisioned(&latest)?;
        Ok(())
    }

    /// Mark the pending record of an abandoned instance `Unknown`.
    ///
    /// Only `New` providers keep records, so this is a no-op for `Existing` ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or updated.
    pub fn abandon_pending_provisioning(&self, instance_id: GitspaceInstanceId) -> Result<()> {
        let Some(mut latest) = self.store.find_latest_infra_provisioned(instance_id)? else {
            return Ok(());
        };
        if latest.infra_status != InfraStatus::Pending {
            return Ok(());
        }

        info!(
            gitspace_instance_id = %instance_id,
            record_id = %latest.id,
            "Abandoning pending provisioning record"
        );
        latest.infra_status = InfraStatus::Unknown;
        latest.updated = Utc::now();
        self.store.update_infra_provisioned(&latest)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn provision_new_infrastructure(
        &self,
        provider: &dyn InfraProvider,
        config: &GitspaceConfig,
        instance: &GitspaceInstance,
        resource: &InfraProviderResource,
        params: Vec<InfraProviderParameter>,
        config_metadata: ConfigMetadata,
        opts: InfraEventOpts,
        existing_infra: Option<Infrastructure>,
    ) -> Result<()> {
        let routing_key = self.routing_key(config, instance, resource);
        let agent_port = self.config.agent_port;

        let pending = Infrastructure {
            identifier: instance.identifier.clone(),
            space_id: config.space_id,
            space_path: config.space_path.clone(),
            gitspace_config_identifier: config.identifier.clone(),
            gitspace_instance_id: instance.id,
            provider_type: resource.provider_type,
            input_parameters: params.clone(),
            agent_host: None,
            agent_port,
            proxy_agent_host: None,
            proxy_agent_port: None,
            gateway_host: resource.gateway_host.clone(),
            storage_identifier: None,
            port_mappings: std::collections::BTreeMap::new(),
            instance_info: existing_infra
                .as_ref()
                .map(|infra| infra.instance_info.clone())
                .unwrap_or_default(),
            routing_key: routing_key.clone(),
            status: InfraStatus::Pending,
        };

        let now = Utc::now();
        let mut record = InfraProvisioned {
            id: InfraProvisionedId::new(0),
            gitspace_instance_id: instance.id,
            infra_provider_type: resource.provider_type,
            infra_provider_resource_id: resource.id,
            space_id: config.space_id,
            created: now,
            updated: now,
            response_metadata: Some(pending.to_json()?),
            input_params: params_to_string(&params)?,
            infra_status: InfraStatus::Pending,
            server_host_ip: None,
            server_host_port: None,
            proxy_host: None,
            proxy_port: None,
            gateway_host: resource.gateway_host.clone(),
        };
        self.store.create_infra_provisioned(&mut record)?;

        info!(
            gitspace_instance_id = %instance.id,
            record_id = %record.id,
            provider = %resource.provider_type,
            "Provisioning new infrastructure"
        );

        let request = ProvisionRequest {
            space_id: config.space_id,
            space_path: config.space_path.clone(),
            gitspace_config_identifier: config.identifier.clone(),
            gitspace_instance_identifier: instance.identifier.clone(),
            gitspace_instance_id: instance.id,
            agent_port,
            required_ports: opts.required_ports,
            input_params: params,
            config_metadata,
            existing_infra,
            routing_key,
        };

        if let Err(source) = provider.provision(request).await {
            record.infra_status = InfraStatus::Unknown;
            record.updated = Utc::now();
            if let Err(update_err) = self.store.update_infra_provisioned(&record) {
                error!(
                    record_id = %record.id,
                    error = %update_err,
                    "Failed to mark provisioning record unknown"
                );
            }
            return Err(ControlError::Provider {
                event: InfraEvent::Provision,
                source,
            });
        }
        Ok(())
    }

    /// Template parameters merged with the resource's literal parameters, plus the
    /// provider config metadata. Empty names and values are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the template or provider config cannot be loaded.
    pub fn get_all_params_from_db(
        &self,
        resource: &InfraProviderResource,
    ) -> Result<(Vec<InfraProviderParameter>, ConfigMetadata)> {
        let mut params = Vec::new();

        if let Some(template_identifier) = resource
            .template_identifier
            .as_deref()
            .filter(|t| !t.is_empty())
        {
            let template = self
                .store
                .find_infra_provider_template(resource.space_id, template_identifier)?
                .ok_or_else(|| ControlError::TemplateNotFound(template_identifier.to_string()))?;
            params.extend(
                string_to_params(&template.data)?
                    .into_iter()
                    .filter(|p| !p.name.is_empty() && !p.value.is_empty()),
            );
        }

        params.extend(
            resource
                .metadata
                .iter()
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .map(|(k, v)| InfraProviderParameter::new(k.as_str(), v.as_str())),
        );

        let provider_config = self
            .store
            .get_infra_provider_config(resource.infra_provider_config_id)?
            .ok_or(ControlError::ProviderConfigNotFound(
                resource.infra_provider_config_id,
            ))?;

        Ok((params, provider_config.metadata))
    }

    /// The descriptor left behind by the config's previous run, if it was stopped.
    ///
    /// Instances are scanned newest first; the first one with a provisioned record
    /// decides. Its latest record must be `Stopped` for the descriptor to be reused.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read or decoded.
    pub fn get_stopped_infra_from_stored_info(
        &self,
        config: &GitspaceConfig,
    ) -> Result<Option<Infrastructure>> {
        let mut instances = self.store.list_gitspace_instances_by_config(config.id)?;
        instances.sort_by_key(|instance| instance.id);

        for instance in instances.iter().rev() {
            let Some(record) = self.store.find_latest_infra_provisioned(instance.id)? else {
                continue;
            };
            if record.infra_status != InfraStatus::Stopped {
                return Ok(None);
            }
            return match record.response_metadata.as_deref() {
                Some(data) => {
                    let mut infra = Infrastructure::from_json(data)?;
                    infra.status = record.infra_status;
                    debug!(
                        gitspace = %config.identifier,
                        stopped_instance_id = %instance.id,
                        "Found stopped infrastructure to reuse"
                    );
                    Ok(Some(infra))
                }
                None => Ok(None),
            };
        }
        Ok(None)
    }

    /// Current infrastructure of the config's latest instance.
    ///
    /// `New` providers answer from the latest provisioned record, which must be in
    /// one of `allowed`. `Existing` providers are asked directly.
    ///
    /// # Errors
    ///
    /// Returns `InfraNotFound` if there is nothing to act on, or
    /// `UnexpectedInfraStatus` if the record is in a status outside `allowed`.
    pub async fn find_infra(
        &self,
        config: &GitspaceConfig,
        event: InfraEvent,
        allowed: &[InfraStatus],
    ) -> Result<Infrastructure> {
        let instance = config.instance.as_ref().ok_or_else(|| {
            ControlError::GitspaceNotFound(format!("{} has no instance", config.identifier))
        })?;
        let resource = self.resource(config)?;
        let provider = self.factory.get(resource.provider_type)?;

        match provider.provisioning_type() {
            ProvisioningType::New => {
                let record = self
                    .store
                    .find_latest_infra_provisioned(instance.id)?
                    .ok_or(ControlError::InfraNotFound(instance.id))?;
                if !allowed.contains(&record.infra_status) {
                    return Err(ControlError::UnexpectedInfraStatus {
                        instance_id: instance.id,
                        status: record.infra_status,
                        event,
                    });
                }
                let data = record
                    .response_metadata
                    .as_deref()
                    .ok_or(ControlError::InfraNotFound(instance.id))?;
                let mut infra = Infrastructure::from_json(data)?;
                infra.status = record.infra_status;
                Ok(infra)
            }
            ProvisioningType::Existing => {
                let (params, _) = self.get_all_params_from_db(&resource)?;
                let request = FindRequest {
                    space_id: config.space_id,
                    space_path: config.space_path.clone(),
                    gitspace_config_identifier: config.identifier.clone(),
                    gitspace_instance_identifier: instance.identifier.clone(),
                    gitspace_instance_id: instance.id,
                    input_params: params,
                };
                provider
                    .find(request)
                    .await?
                    .ok_or(ControlError::InfraNotFound(instance.id))
            }
        }
    }

    pub(crate) fn resource(&self, config: &GitspaceConfig) -> Result<InfraProviderResource> {
        self.store
            .get_infra_provider_resource(config.infra_provider_resource_id)?
            .ok_or(ControlError::ResourceNotFound(
                config.infra_provider_resource_id,
            ))
    }

    fn routing_key(
        &self,
        config: &GitspaceConfig,
        instance: &GitspaceInstance,
        resource: &InfraProviderResource,
    ) -> Option<String> {
        let use_piper = self.config.use_ssh_piper
            && resource.provider_type.is_hybrid_vm()
            && instance.access_type == GitspaceAccessType::SshKey;
        use_piper.then(|| naming::routing_key(&config.space_path, &config.identifier))
    }
}

fn required_infra<'a>(
    infra: Option<&'a Infrastructure>,
    config: &GitspaceConfig,
    event: InfraEvent,
) -> Result<&'a Infrastructure> {
    infra.ok_or_else(|| {
        ControlError::Internal(format!(
            "{event} of gitspace {} requires infrastructure",
            config.identifier
        ))
    })
}
