//! The infrastructure provider capability.
//!
//! Every backend (Docker engine, hybrid VM pools, ...) implements
//! [`InfraProvider`]. Long running operations may complete asynchronously; their
//! outcome is reported through the [`InfraEventSink`](crate::InfraEventSink) the
//! provider was built with.

use async_trait::async_trait;
use gitspace_store::{
    ConfigMetadata, GitspaceConfig, InfraProviderConfig, InfraProviderParameter,
    InfraProviderType,
};

use crate::types::{FindRequest, Infrastructure, ParameterSchema, ProvisionRequest, ProvisioningType};
use crate::Result;

/// The `InfraProvider` trait defines the interface every backend must satisfy.
#[async_trait]
pub trait InfraProvider: Send + Sync {
    /// Provider type this implementation serves.
    fn provider_type(&self) -> InfraProviderType;

    /// Whether this provider creates resources per instance or reuses a backend.
    fn provisioning_type(&self) -> ProvisioningType;

    /// Begin provisioning infrastructure for an instance.
    ///
    /// Completion is reported through the provider's event sink. The orchestrator
    /// guarantees at most one in-flight attempt per instance.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning fails before any asynchronous work starts.
    async fn provision(&self, request: ProvisionRequest) -> Result<()>;

    /// Look up the current infrastructure of an instance. Has no side effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn find(&self, request: FindRequest) -> Result<Option<Infrastructure>>;

    /// Release resources that do not hold user data.
    ///
    /// # Errors
    ///
    /// Returns an error if the stop request fails.
    async fn stop(
        &self,
        infra: &Infrastructure,
        config: &GitspaceConfig,
        config_metadata: &ConfigMetadata,
    ) -> Result<()>;

    /// Release all resources. Storage holding user data is only removed when
    /// `can_delete_user_data` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the deprovision request fails.
    async fn deprovision(
        &self,
        infra: &Infrastructure,
        config: &GitspaceConfig,
        can_delete_user_data: bool,
        config_metadata: &ConfigMetadata,
        params: &[InfraProviderParameter],
    ) -> Result<()>;

    /// Release resources scoped to a single instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup request fails.
    async fn cleanup_instance_resources(&self, infra: &Infrastructure) -> Result<()>;

    /// Reject malformed or missing parameters before any side effect.
    ///
    /// # Errors
    ///
    /// Returns `InfraError::InvalidParams` describing the first problem found.
    fn validate_params(&self, params: &[InfraProviderParameter]) -> Result<()>;

    /// Parameters the provider understands on a resource.
    fn available_params(&self) -> Vec<ParameterSchema>;

    /// Parameters the provider understands in a template.
    fn template_params(&self) -> Vec<ParameterSchema>;

    /// Fill in derived or defaulted parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be completed.
    fn update_params(
        &self,
        params: &[InfraProviderParameter],
        config_metadata: &ConfigMetadata,
    ) -> Result<Vec<InfraProviderParameter>>;

    /// Check a provider config before it is saved.
    ///
    /// # Errors
    ///
    /// Returns `InfraError::InvalidConfig` if the config is not usable.
    fn validate_config(&self, config: &InfraProviderConfig) -> Result<()>;

    /// Normalize a provider config before it is saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be normalized.
    fn update_config(&self, config: InfraProviderConfig) -> Result<InfraProviderConfig>;

    /// Render the setup document an operator applies to bootstrap the backend.
    ///
    /// # Errors
    ///
    /// Returns `InfraError::Unsupported` for providers without a setup step.
    fn generate_setup_yaml(&self, config: &InfraProviderConfig) -> Result<String>;
}

/// Mock provider for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use gitspace_store::InfraStatus;
    use parking_lot::Mutex;

    use crate::sink::InfraEventSink;
    use crate::types::{InfraEvent, InfraEventReport, InstanceInfo, PortMapping};
    use crate::InfraError;

    /// Host the mock reports for provisioned agents.
    pub const MOCK_AGENT_HOST: &str = "10.0.0.5";

    /// First host port handed out for port mappings.
    const FIRST_PUBLISHED_PORT: u16 = 40_000;

    /// A provider that records calls and reports completions immediately.
    pub struct MockInfraProvider {
        provider_type: InfraProviderType,
        provisioning_type: ProvisioningType,
        sink: Arc<dyn InfraEventSink>,
        fail_provision: AtomicBool,
        report_completions: AtomicBool,
        required_param: Option<String>,
        calls: Mutex<Vec<InfraEvent>>,
        last_can_delete_user_data: Mutex<Option<bool>>,
        last_existing_infra: Mutex<Option<Infrastructure>>,
    }

    impl MockInfraProvider {
        /// Create a mock of the given provisioning type.
        #[must_use]
        pub fn new(
            provider_type: InfraProviderType,
            provisioning_type: ProvisioningType,
            sink: Arc<dyn InfraEventSink>,
        ) -> Self {
            Self {
                provider_type,
                provisioning_type,
                sink,
                fail_provision: AtomicBool::new(false),
                report_completions: AtomicBool::new(true),
                required_param: None,
                calls: Mutex::new(Vec::new()),
                last_can_delete_user_data: Mutex::new(None),
                last_existing_infra: Mutex::new(None),
            }
        }

        /// Require a parameter to be present for validation to pass.
        #[must_use]
        pub fn with_required_param(mut self, name: impl Into<String>) -> Self {
            self.required_param = Some(name.into());
            self
        }

        /// Make the next provision calls fail synchronously.
        pub fn set_fail_provision(&self, fail: bool) {
            self.fail_provision.store(fail, Ordering::SeqCst);
        }

        /// Stop emitting completion reports, simulating a crashed worker.
        pub fn set_report_completions(&self, report: bool) {
            self.report_completions.store(report, Ordering::SeqCst);
        }

        /// Number of calls made for an event.
        #[must_use]
        pub fn call_count(&self, event: InfraEvent) -> usize {
            self.calls.lock().iter().filter(|e| **e == event).count()
        }

        /// The `can_delete_user_data` flag of the last deprovision call.
        #[must_use]
        pub fn last_can_delete_user_data(&self) -> Option<bool> {
            *self.last_can_delete_user_data.lock()
        }

        /// The stopped infrastructure handed to the last provision call.
        #[must_use]
        pub fn last_existing_infra(&self) -> Option<Infrastructure> {
            self.last_existing_infra.lock().clone()
        }

        fn report(&self, event: InfraEvent, infra: Infrastructure) {
            if self.report_completions.load(Ordering::SeqCst) {
                self.sink.emit(InfraEventReport {
                    event,
                    infra,
                    error: None,
                });
            }
        }
    }

    #[async_trait]
    impl InfraProvider for MockInfraProvider {
        fn provider_type(&self) -> InfraProviderType {
            self.provider_type
        }

        fn provisioning_type(&self) -> ProvisioningType {
            self.provisioning_type
        }

        async fn provision(&self, request: ProvisionRequest) -> Result<()> {
            self.calls.lock().push(InfraEvent::Provision);
            *self.last_existing_infra.lock() = request.existing_infra.clone();
            if self.fail_provision.load(Ordering::SeqCst) {
                return Err(InfraError::Provider("mock provision failure".to_string()));
            }

            let port_mappings: BTreeMap<u16, PortMapping> = request
                .required_ports
                .iter()
                .zip(FIRST_PUBLISHED_PORT..)
                .map(|(port, published)| {
                    (
                        port.port,
                        PortMapping {
                            published_port: published,
                            forwarded_port: port.port,
                        },
                    )
                })
                .collect();

            let infra = Infrastructure {
                identifier: request.gitspace_instance_identifier,
                space_id: request.space_id,
                space_path: request.space_path,
                gitspace_config_identifier: request.gitspace_config_identifier,
                gitspace_instance_id: request.gitspace_instance_id,
                provider_type: self.provider_type,
                input_parameters: request.input_params,
                agent_host: Some(MOCK_AGENT_HOST.to_string()),
                agent_port: request.agent_port,
                proxy_agent_host: None,
                proxy_agent_port: None,
                gateway_host: None,
                storage_identifier: None,
                port_mappings,
                instance_info: InstanceInfo {
                    id: Some("mock-machine".to_string()),
                    ..InstanceInfo::default()
                },
                routing_key: request.routing_key,
                status: InfraStatus::Provisioned,
            };
            self.report(InfraEvent::Provision, infra);
            Ok(())
        }

        async fn find(&self, _request: FindRequest) -> Result<Option<Infrastructure>> {
            Ok(None)
        }

        async fn stop(
            &self,
            infra: &Infrastructure,
            _config: &GitspaceConfig,
            _config_metadata: &ConfigMetadata,
        ) -> Result<()> {
            self.calls.lock().push(InfraEvent::Stop);
            let mut stopped = infra.clone();
            stopped.status = InfraStatus::Stopped;
            self.report(InfraEvent::Stop, stopped);
            Ok(())
        }

        async fn deprovision(
            &self,
            infra: &Infrastructure,
            _config: &GitspaceConfig,
            can_delete_user_data: bool,
            _config_metadata: &ConfigMetadata,
            _params: &[InfraProviderParameter],
        ) -> Result<()> {
            self.calls.lock().push(InfraEvent::Deprovision);
            *self.last_can_delete_user_data.lock() = Some(can_delete_user_data);
            let mut destroyed = infra.clone();
            destroyed.status = InfraStatus::Destroyed;
            self.report(InfraEvent::Deprovision, destroyed);
            Ok(())
        }

        async fn cleanup_instance_resources(&self, infra: &Infrastructure) -> Result<()> {
            self.calls.lock().push(InfraEvent::Cleanup);
            let mut cleaned = infra.clone();
            cleaned.status = InfraStatus::Stopped;
            self.report(InfraEvent::Cleanup, cleaned);
            Ok(())
        }

        fn validate_params(&self, params: &[InfraProviderParameter]) -> Result<()> {
            match &self.required_param {
                Some(name) if !params.iter().any(|p| &p.name == name) => Err(
                    InfraError::InvalidParams(format!("missing required parameter {name}")),
                ),
                _ => Ok(()),
            }
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

        fn validate_config(&self, _config: &InfraProviderConfig) -> Result<()> {
            Ok(())
        }

        fn update_config(&self, config: InfraProviderConfig) -> Result<InfraProviderConfig> {
            Ok(config)
        }

        fn generate_setup_yaml(&self, _config: &InfraProviderConfig) -> Result<String> {
            Err(InfraError::Unsupported {
                provider: self.provider_type,
                operation: "generate_setup_yaml",
            })
        }
    }
}
