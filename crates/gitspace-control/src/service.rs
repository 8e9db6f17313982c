//! Gitspace action service.
//!
//! This module provides the `GitspaceActions` trait and the `GitspaceService`
//! implementation that validates user actions, applies the busy guard, updates
//! instance state, and hands the slow infrastructure work to background tasks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use gitspace_core::{naming, GitspaceConfigId, GitspaceInstanceId};
use gitspace_infra::InfraEvent;
use gitspace_store::{
    GitspaceAccessType, GitspaceConfig, GitspaceEntityType, GitspaceInstance,
    GitspaceInstanceState, IdeType, InfraStatus, Space, Store,
};
use tracing::{debug, error, info, warn};

use crate::authz::{AuthSession, Authorizer, Permission};
use crate::error::{ControlError, Result};
use crate::events::{EventEmitter, GitspaceEvent, GitspaceEventType};
use crate::lifecycle;
use crate::provisioner::InfraProvisioner;
use crate::resume::DEFAULT_MACHINE_USER;
use crate::tasks::BackgroundTasks;
use crate::types::{ide_ports, ActionRequest, ControlConfig, GitspaceActionType, InfraEventOpts};

/// Every infra status a delete may act on.
const DELETABLE_STATUSES: [InfraStatus; 6] = [
    InfraStatus::Pending,
    InfraStatus::Provisioned,
    InfraStatus::Stopped,
    InfraStatus::Unknown,
    InfraStatus::Error,
    InfraStatus::Destroyed,
];

/// Trait defining the user facing gitspace operations.
#[async_trait]
pub trait GitspaceActions: Send + Sync {
    /// Accept an action on a gitspace.
    ///
    /// Returns as soon as the action is accepted; infrastructure work continues in
    /// the background and its outcome shows up in the instance state.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::MissingSpaceRef` without a space reference,
    /// `ControlError::Forbidden` if the permission check fails,
    /// `ControlError::ActionPending` if a recent action has not finished, and
    /// `ControlError::NotRunning` when stopping a gitspace that is not running.
    async fn action(&self, session: &AuthSession, request: ActionRequest)
        -> Result<GitspaceConfig>;

    /// Get a gitspace config with its latest instance attached.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::GitspaceNotFound` if the config does not exist or is deleted.
    async fn find_gitspace(
        &self,
        session: &AuthSession,
        space_ref: &str,
        identifier: &str,
    ) -> Result<GitspaceConfig>;
}

/// The gitspace action service.
pub struct GitspaceService<S: Store> {
    store: Arc<S>,
    authorizer: Arc<dyn Authorizer>,
    worker: ActionWorker<S>,
    tasks: BackgroundTasks,
    config: ControlConfig,
}

impl<S: Store + 'static> GitspaceService<S> {
    /// Create a new service.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        provisioner: Arc<InfraProvisioner<S>>,
        authorizer: Arc<dyn Authorizer>,
        emitter: Arc<dyn EventEmitter>,
        tasks: BackgroundTasks,
        config: ControlConfig,
    ) -> Self {
        let worker = ActionWorker {
            store: store.clone(),
            provisioner,
            emitter,
        };
        Self {
            store,
            authorizer,
            worker,
            tasks,
            config,
        }
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Background task runner used for infrastructure work.
    #[must_use]
    pub const fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    fn resolve_space(&self, space_ref: Option<&str>) -> Result<Space> {
        let space_ref = space_ref
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ControlError::MissingSpaceRef)?;
        self.store
            .find_space_by_path(space_ref)?
            .ok_or_else(|| ControlError::SpaceNotFound(space_ref.to_string()))
    }

    /// Load a config by identifier with its latest instance and derived state.
    fn load_config(
        &self,
        space: &Space,
        identifier: &str,
        include_marked: bool,
    ) -> Result<GitspaceConfig> {
        let mut config = self
            .store
            .find_gitspace_config_by_identifier(space.id, identifier)?
            .filter(|c| !c.is_deleted && (include_marked || !c.is_marked_for_deletion))
            .ok_or_else(|| ControlError::GitspaceNotFound(identifier.to_string()))?;
        config.instance = self.store.find_latest_gitspace_instance(config.id)?;
        config.state = lifecycle::config_state(config.instance.as_ref().map(|i| i.state));
        Ok(config)
    }

    /// Refuse to act on an instance that is busy, unless it has been busy for
    /// longer than the busy window, in which case it is forced to `Error`.
    fn guard_busy_instance(
        &self,
        config: &GitspaceConfig,
        instance: &mut GitspaceInstance,
    ) -> Result<()> {
        if !lifecycle::is_busy(instance.state) {
            return Ok(());
        }
        if !lifecycle::is_stale(instance.updated, self.config.busy_action_timeout()) {
            return Err(ControlError::ActionPending {
                identifier: instance.identifier.clone(),
                state: instance.state,
            });
        }

        warn!(
            gitspace = %config.identifier,
            instance = %instance.identifier,
            state = %instance.state,
            "Instance stuck in busy state, forcing error"
        );
        instance.error_message = Some(format!(
            "previous action timed out in state {}",
            instance.state
        ));
        instance.state = GitspaceInstanceState::Error;
        instance.updated = Utc::now();
        self.store.update_gitspace_instance(instance)?;
        self.worker.provisioner.abandon_pending_provisioning(instance.id)?;
        self.worker
            .emit_instance(config, instance, GitspaceEventType::GitspaceActionTimedOut);
        Ok(())
    }

    fn start(&self, mut config: GitspaceConfig) -> Result<GitspaceConfig> {
        if let Some(mut instance) = config.instance.take() {
            self.guard_busy_instance(&config, &mut instance)?;
            if !lifecycle::is_terminal(instance.state) {
                info!(
                    gitspace = %config.identifier,
                    instance = %instance.identifier,
                    state = %instance.state,
                    "Gitspace already running"
                );
                config.instance = Some(instance);
                return Ok(config);
            }
        }

        let mut instance = new_instance(&config);
        self.store.create_gitspace_instance(&mut instance)?;
        debug!(
            gitspace = %config.identifier,
            instance = %instance.identifier,
            access_type = ?instance.access_type,
            "Created gitspace instance"
        );

        let latest = self
            .store
            .find_latest_gitspace_instance(config.id)?
            .ok_or_else(|| {
                ControlError::Internal(format!("instance of {} vanished", config.identifier))
            })?;
        config.state = lifecycle::config_state(Some(latest.state));
        config.instance = Some(latest);
        config.updated = Utc::now();
        self.store.update_gitspace_config(&config)?;

        let worker = self.worker.clone();
        let task_config = config.clone();
        self.tasks.spawn("start_gitspace", async move {
            worker.start_gitspace(task_config).await;
        });
        Ok(config)
    }

    fn stop(&self, mut config: GitspaceConfig) -> Result<GitspaceConfig> {
        let mut instance = config
            .instance
            .take()
            .filter(|i| !lifecycle::is_terminal(i.state))
            .ok_or_else(|| ControlError::NotRunning(config.identifier.clone()))?;
        self.guard_busy_instance(&config, &mut instance)?;

        instance.state = lifecycle::validate_transition(
            &instance.identifier,
            instance.state,
            GitspaceInstanceState::Stopping,
        )?;
        instance.updated = Utc::now();
        self.store.update_gitspace_instance(&instance)?;

        config.state = lifecycle::config_state(Some(instance.state));
        config.instance = Some(instance);
        config.updated = Utc::now();
        self.store.update_gitspace_config(&config)?;

        let worker = self.worker.clone();
        let task_config = config.clone();
        self.tasks.spawn("stop_gitspace", async move {
            worker.stop_gitspace(task_config).await;
        });
        Ok(config)
    }

    fn delete(&self, mut config: GitspaceConfig) -> Result<GitspaceConfig> {
        let mut instance = config.instance.take();
        if let Some(instance) = instance.as_mut() {
            self.guard_busy_instance(&config, instance)?;
        }

        let live = instance.filter(|i| {
            !matches!(
                i.state,
                GitspaceInstanceState::Deleted | GitspaceInstanceState::Cleaned
            )
        });

        config.is_marked_for_deletion = true;
        config.updated = Utc::now();

        let Some(mut instance) = live else {
            config.is_deleted = true;
            self.store.update_gitspace_config(&config)?;
            info!(gitspace = %config.identifier, "Deleted gitspace without infrastructure");
            return Ok(config);
        };

        instance.state = lifecycle::validate_transition(
            &instance.identifier,
            instance.state,
            GitspaceInstanceState::Deleting,
        )?;
        instance.updated = Utc::now();
        self.store.update_gitspace_instance(&instance)?;

        config.state = lifecycle::config_state(Some(instance.state));
        config.instance = Some(instance);
        self.store.update_gitspace_config(&config)?;

        let worker = self.worker.clone();
        let task_config = config.clone();
        self.tasks.spawn("delete_gitspace", async move {
            worker.delete_gitspace(task_config).await;
        });
        Ok(config)
    }
}

#[async_trait]
impl<S: Store + 'static> GitspaceActions for GitspaceService<S> {
    async fn action(
        &self,
        session: &AuthSession,
        request: ActionRequest,
    ) -> Result<GitspaceConfig> {
        naming::validate_identifier(&request.identifier)?;
        let space = self.resolve_space(request.space_ref.as_deref())?;
        self.authorizer
            .check(
                session,
                &space.path,
                &request.identifier,
                Permission::for_action(request.action),
            )
            .await?;

        let config = self.load_config(&space, &request.identifier, false)?;
        let (requested, failed) = match request.action {
            GitspaceActionType::Start => (
                GitspaceEventType::GitspaceActionStart,
                GitspaceEventType::GitspaceActionStartFailed,
            ),
            GitspaceActionType::Stop => (
                GitspaceEventType::GitspaceActionStop,
                GitspaceEventType::GitspaceActionStopFailed,
            ),
            GitspaceActionType::Delete => (
                GitspaceEventType::GitspaceActionDelete,
                GitspaceEventType::GitspaceActionDeleteFailed,
            ),
        };

        info!(
            gitspace = %config.identifier,
            space = %space.path,
            action = request.action.as_str(),
            principal = %session.principal_uid,
            "Gitspace action requested"
        );
        let (config_id, config_identifier) = (config.id, config.identifier.clone());
        self.worker.emit_config(config_id, &config_identifier, requested);

        let result = match request.action {
            GitspaceActionType::Start => self.start(config),
            GitspaceActionType::Stop => self.stop(config),
            GitspaceActionType::Delete => self.delete(config),
        };

        if let Err(e) = &result {
            warn!(
                gitspace = %config_identifier,
                action = request.action.as_str(),
                error = %e,
                "Gitspace action failed"
            );
            self.worker.emit_config(config_id, &config_identifier, failed);
        }
        result
    }

    async fn find_gitspace(
        &self,
        session: &AuthSession,
        space_ref: &str,
        identifier: &str,
    ) -> Result<GitspaceConfig> {
        naming::validate_identifier(identifier)?;
        let space = self.resolve_space(Some(space_ref))?;
        self.authorizer
            .check(session, &space.path, identifier, Permission::GitspaceView)
            .await?;
        self.load_config(&space, identifier, true)
    }
}

/// Build a fresh `Starting` instance with IDE dependent access credentials.
fn new_instance(config: &GitspaceConfig) -> GitspaceInstance {
    let (access_type, access_key_ref) = match config.ide {
        IdeType::VsCodeWeb => (
            GitspaceAccessType::JwtToken,
            Some(uuid::Uuid::new_v4().to_string()),
        ),
        IdeType::VsCode | IdeType::Intellij => match &config.ssh_token_identifier {
            Some(key) => (GitspaceAccessType::SshKey, Some(key.clone())),
            None => (GitspaceAccessType::UserCredentials, None),
        },
    };

    let now = Utc::now();
    GitspaceInstance {
        id: GitspaceInstanceId::new(0),
        gitspace_config_id: config.id,
        identifier: naming::instance_identifier(&config.identifier),
        state: GitspaceInstanceState::Starting,
        url: None,
        access_type,
        access_key_ref,
        machine_user: Some(DEFAULT_MACHINE_USER.to_string()),
        space_id: config.space_id,
        space_path: config.space_path.clone(),
        last_used: None,
        last_heartbeat: None,
        active_time_started: None,
        active_time_ended: None,
        total_time_used_ms: 0,
        error_message: None,
        created: now,
        updated: now,
    }
}

/// Runs the infrastructure side of accepted actions.
struct ActionWorker<S: Store> {
    store: Arc<S>,
    provisioner: Arc<InfraProvisioner<S>>,
    emitter: Arc<dyn EventEmitter>,
}

impl<S: Store> Clone for ActionWorker<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            provisioner: self.provisioner.clone(),
            emitter: self.emitter.clone(),
        }
    }
}

impl<S: Store> ActionWorker<S> {
    async fn start_gitspace(&self, config: GitspaceConfig) {
        let Some(instance) = config.instance.clone() else {
            return;
        };
        self.emit_instance(&config, &instance, GitspaceEventType::InfraProvisioningStart);

        let opts = InfraEventOpts {
            required_ports: ide_ports(config.ide),
            delete_user_data: false,
        };
        let result = self
            .provisioner
            .trigger_infra_event_with_opts(InfraEvent::Provision, &config, None, opts)
            .await;

        match result {
            Ok(()) => debug!(gitspace = %config.identifier, "Provisioning triggered"),
            Err(ControlError::AlreadyProvisioning(record_id)) => {
                warn!(
                    gitspace = %config.identifier,
                    record_id = %record_id,
                    "Provisioning already in flight"
                );
            }
            Err(e) => {
                error!(gitspace = %config.identifier, error = %e, "Provisioning failed");
                self.emit_instance(&config, &instance, GitspaceEventType::InfraProvisioningFailed);
                self.emit_instance(&config, &instance, GitspaceEventType::GitspaceActionStartFailed);
                self.record_failure(config.id, instance.id, &e);
            }
        }
    }

    async fn stop_gitspace(&self, config: GitspaceConfig) {
        let Some(instance) = config.instance.clone() else {
            return;
        };
        self.emit_instance(&config, &instance, GitspaceEventType::InfraStopStart);

        if let Err(e) = self.stop_infra(&config).await {
            error!(gitspace = %config.identifier, error = %e, "Stopping infrastructure failed");
            self.emit_instance(&config, &instance, GitspaceEventType::InfraStopFailed);
            self.emit_instance(&config, &instance, GitspaceEventType::GitspaceActionStopFailed);
            self.record_failure(config.id, instance.id, &e);
        }
    }

    async fn stop_infra(&self, config: &GitspaceConfig) -> Result<()> {
        let infra = self
            .provisioner
            .find_infra(config, InfraEvent::Stop, &[InfraStatus::Provisioned])
            .await?;
        self.provisioner
            .trigger_infra_event(InfraEvent::Stop, config, Some(&infra))
            .await
    }

    async fn delete_gitspace(&self, config: GitspaceConfig) {
        let Some(instance) = config.instance.clone() else {
            return;
        };
        self.emit_instance(&config, &instance, GitspaceEventType::InfraDeprovisioningStart);

        if let Err(e) = self.deprovision_infra(&config, &instance).await {
            error!(gitspace = %config.identifier, error = %e, "Deprovisioning failed");
            self.emit_instance(&config, &instance, GitspaceEventType::InfraDeprovisioningFailed);
            self.emit_instance(&config, &instance, GitspaceEventType::GitspaceActionDeleteFailed);
            self.record_failure(config.id, instance.id, &e);
        }
    }

    async fn deprovision_infra(
        &self,
        config: &GitspaceConfig,
        instance: &GitspaceInstance,
    ) -> Result<()> {
        let infra = match self
            .provisioner
            .find_infra(config, InfraEvent::Deprovision, &DELETABLE_STATUSES)
            .await
        {
            Ok(infra) if infra.status != InfraStatus::Destroyed => infra,
            Ok(_) | Err(ControlError::InfraNotFound(_)) => {
                return self.finish_delete_without_infra(config, instance);
            }
            Err(e) => return Err(e),
        };

        let opts = InfraEventOpts {
            required_ports: Vec::new(),
            delete_user_data: true,
        };
        self.provisioner
            .trigger_infra_event_with_opts(InfraEvent::Deprovision, config, Some(&infra), opts)
            .await
    }

    /// Nothing left to release: complete the delete locally.
    fn finish_delete_without_infra(
        &self,
        config: &GitspaceConfig,
        instance: &GitspaceInstance,
    ) -> Result<()> {
        let mut instance = self
            .store
            .get_gitspace_instance(instance.id)?
            .ok_or_else(|| ControlError::GitspaceNotFound(instance.identifier.clone()))?;
        instance.state = GitspaceInstanceState::Deleted;
        instance.url = None;
        instance.updated = Utc::now();
        self.store.update_gitspace_instance(&instance)?;

        let mut stored = self
            .store
            .get_gitspace_config(config.id)?
            .ok_or_else(|| ControlError::GitspaceNotFound(config.identifier.clone()))?;
        stored.is_deleted = true;
        stored.state = lifecycle::config_state(Some(instance.state));
        stored.updated = Utc::now();
        self.store.update_gitspace_config(&stored)?;

        info!(gitspace = %config.identifier, "Deleted gitspace, no infrastructure to release");
        self.emit_instance(config, &instance, GitspaceEventType::InfraDeprovisioningCompleted);
        Ok(())
    }

    /// Move the instance to `Error` unless a completion already settled it.
    fn record_failure(
        &self,
        config_id: GitspaceConfigId,
        instance_id: GitspaceInstanceId,
        cause: &ControlError,
    ) {
        if let Err(e) = self.try_record_failure(config_id, instance_id, cause) {
            error!(
                gitspace_instance_id = %instance_id,
                error = %e,
                "Failed to record action failure"
            );
        }
    }

    fn try_record_failure(
        &self,
        config_id: GitspaceConfigId,
        instance_id: GitspaceInstanceId,
        cause: &ControlError,
    ) -> Result<()> {
        let Some(mut instance) = self.store.get_gitspace_instance(instance_id)? else {
            return Ok(());
        };
        if !lifecycle::is_busy(instance.state) {
            return Ok(());
        }
        instance.state = GitspaceInstanceState::Error;
        instance.error_message = Some(cause.to_string());
        instance.updated = Utc::now();
        self.store.update_gitspace_instance(&instance)?;

        if let Some(mut config) = self.store.get_gitspace_config(config_id)? {
            let is_latest = self
                .store
                .find_latest_gitspace_instance(config_id)?
                .is_some_and(|latest| latest.id == instance_id);
            if is_latest {
                config.state = lifecycle::config_state(Some(instance.state));
                config.updated = Utc::now();
                self.store.update_gitspace_config(&config)?;
            }
        }
        Ok(())
    }

    fn emit_config(&self, config_id: GitspaceConfigId, identifier: &str, event: GitspaceEventType) {
        self.emitter.emit(GitspaceEvent::now(
            GitspaceEntityType::GitspaceConfig,
            config_id.get(),
            identifier,
            event,
        ));
    }

    fn emit_instance(
        &self,
        config: &GitspaceConfig,
        instance: &GitspaceInstance,
        event: GitspaceEventType,
    ) {
        self.emitter.emit(GitspaceEvent::now(
            GitspaceEntityType::GitspaceInstance,
            instance.id.get(),
            config.identifier.as_str(),
            event,
        ));
    }
}
