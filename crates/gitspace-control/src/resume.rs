//! Instance bookkeeping once infrastructure reports back.
//!
//! Each handler moves the instance to the state the reported infrastructure
//! implies and emits the matching events. Persisting the result is left to the
//! caller.

use std::sync::Arc;

use chrono::Utc;
use gitspace_infra::Infrastructure;
use gitspace_store::{
    GitspaceConfig, GitspaceEntityType, GitspaceInstance, GitspaceInstanceState, IdeType,
    InfraStatus,
};
use tracing::{info, warn};

use crate::events::{EventEmitter, GitspaceEvent, GitspaceEventType};
use crate::lifecycle;
use crate::types::{SSH_PORT, VS_CODE_WEB_PORT};

/// User the IDE logs in as when the instance does not name one.
pub const DEFAULT_MACHINE_USER: &str = "vscode";

/// Applies completion reports to instances.
pub struct GitspaceResumer {
    emitter: Arc<dyn EventEmitter>,
}

impl GitspaceResumer {
    /// Create a resumer emitting through `emitter`.
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self { emitter }
    }

    /// Finish a start: `Running` with an IDE URL, or `Error`.
    pub fn resume_start(
        &self,
        config: &GitspaceConfig,
        instance: &mut GitspaceInstance,
        infra: &Infrastructure,
        error: Option<&str>,
    ) {
        if error.is_none() && infra.status == InfraStatus::Provisioned {
            self.emit(config, instance, GitspaceEventType::InfraProvisioningCompleted);

            let now = Utc::now();
            transition(instance, GitspaceInstanceState::Running);
            instance.url = ide_url(config, instance, infra);
            instance.error_message = None;
            instance.last_used = Some(now);
            instance.last_heartbeat = Some(now);
            instance.active_time_started = Some(now);
            instance.active_time_ended = None;

            info!(
                gitspace = %config.identifier,
                instance = %instance.identifier,
                url = instance.url.as_deref().unwrap_or_default(),
                "Gitspace is running"
            );
            self.emit(config, instance, GitspaceEventType::GitspaceActionStartCompleted);
        } else {
            fail(
                instance,
                error,
                format!("provisioning finished with status {}", infra.status),
            );
            self.emit(config, instance, GitspaceEventType::InfraProvisioningFailed);
            self.emit(config, instance, GitspaceEventType::GitspaceActionStartFailed);
        }
    }

    /// Finish a stop: `Stopped` with the active window closed, or `Error`.
    pub fn resume_stop(
        &self,
        config: &GitspaceConfig,
        instance: &mut GitspaceInstance,
        infra: &Infrastructure,
        error: Option<&str>,
    ) {
        if error.is_none() && matches!(infra.status, InfraStatus::Stopped | InfraStatus::Destroyed) {
            self.emit(config, instance, GitspaceEventType::InfraStopCompleted);
            close_active_window(instance);
            transition(instance, GitspaceInstanceState::Stopped);
            instance.url = None;
            self.emit(config, instance, GitspaceEventType::GitspaceActionStopCompleted);
        } else {
            fail(
                instance,
                error,
                format!("stop finished with status {}", infra.status),
            );
            self.emit(config, instance, GitspaceEventType::InfraStopFailed);
            self.emit(config, instance, GitspaceEventType::GitspaceActionStopFailed);
        }
    }

    /// Finish a delete: `Deleted` and the config soft-deleted, or `Error`.
    pub fn resume_delete(
        &self,
        config: &mut GitspaceConfig,
        instance: &mut GitspaceInstance,
        infra: &Infrastructure,
        error: Option<&str>,
    ) {
        if error.is_none() && infra.status == InfraStatus::Destroyed {
            self.emit(config, instance, GitspaceEventType::InfraDeprovisioningCompleted);
            close_active_window(instance);
            transition(instance, GitspaceInstanceState::Deleted);
            instance.url = None;
            config.is_deleted = true;
            config.updated = Utc::now();
            info!(gitspace = %config.identifier, "Gitspace deleted");
        } else {
            fail(
                instance,
                error,
                format!("deprovisioning finished with status {}", infra.status),
            );
            self.emit(config, instance, GitspaceEventType::InfraDeprovisioningFailed);
            self.emit(config, instance, GitspaceEventType::GitspaceActionDeleteFailed);
        }
    }

    /// Finish an instance cleanup: `Cleaned`, or `Error`.
    pub fn resume_cleanup(
        &self,
        config: &GitspaceConfig,
        instance: &mut GitspaceInstance,
        infra: &Infrastructure,
        error: Option<&str>,
    ) {
        if error.is_none() && matches!(infra.status, InfraStatus::Stopped | InfraStatus::Destroyed) {
            transition(instance, GitspaceInstanceState::Cleaned);
            self.emit(config, instance, GitspaceEventType::InfraCleanupCompleted);
        } else {
            fail(
                instance,
                error,
                format!("cleanup finished with status {}", infra.status),
            );
            self.emit(config, instance, GitspaceEventType::InfraCleanupFailed);
        }
    }

    fn emit(&self, config: &GitspaceConfig, instance: &GitspaceInstance, event: GitspaceEventType) {
        self.emitter.emit(GitspaceEvent::now(
            GitspaceEntityType::GitspaceInstance,
            instance.id.get(),
            config.identifier.as_str(),
            event,
        ));
    }
}

/// Apply a state reported by infrastructure. The report wins over the state machine.
fn transition(instance: &mut GitspaceInstance, to: GitspaceInstanceState) {
    if !lifecycle::is_valid_transition(instance.state, to) && instance.state != to {
        warn!(
            instance = %instance.identifier,
            from = %instance.state,
            to = %to,
            "Applying out-of-order state reported by infrastructure"
        );
    }
    instance.state = to;
    instance.updated = Utc::now();
}

fn fail(instance: &mut GitspaceInstance, error: Option<&str>, fallback: String) {
    transition(instance, GitspaceInstanceState::Error);
    instance.error_message = Some(error.map_or(fallback, str::to_string));
}

fn close_active_window(instance: &mut GitspaceInstance) {
    let now = Utc::now();
    match instance.active_time_started {
        Some(started) if instance.active_time_ended.is_none() => {
            instance.total_time_used_ms += (now - started).num_milliseconds().max(0);
            instance.active_time_ended = Some(now);
        }
        Some(_) => {}
        None => warn!(
            instance = %instance.identifier,
            "Closing an active window that was never opened"
        ),
    }
}

/// URL the IDE opens the gitspace with.
///
/// Returns `None` when the infrastructure has no reachable host.
#[must_use]
pub fn ide_url(
    config: &GitspaceConfig,
    instance: &GitspaceInstance,
    infra: &Infrastructure,
) -> Option<String> {
    let host = infra.connect_host()?;
    let user = instance
        .machine_user
        .as_deref()
        .unwrap_or(DEFAULT_MACHINE_USER);
    let repo = config.code_repo.name();

    let ide_port = match config.ide {
        IdeType::VsCodeWeb => VS_CODE_WEB_PORT,
        IdeType::VsCode | IdeType::Intellij => SSH_PORT,
    };
    let port = infra
        .port_mappings
        .get(&ide_port)
        .map(|m| {
            if m.published_port == 0 {
                m.forwarded_port
            } else {
                m.published_port
            }
        })
        .filter(|p| *p != 0)
        .unwrap_or(ide_port);

    Some(match config.ide {
        IdeType::VsCodeWeb => format!("http://{host}:{port}/?folder=/home/{user}/{repo}"),
        IdeType::VsCode => {
            format!("vscode://vscode-remote/ssh-remote+{user}@{host}:{port}/home/{user}/{repo}")
        }
        IdeType::Intellij => format!(
            "jetbrains-gateway://connect#host={host}&port={port}&user={user}&projectPath=/home/{user}/{repo}&type=ssh"
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitspace_core::{
        GitspaceConfigId, GitspaceInstanceId, InfraProviderResourceId, SpaceId,
    };
    use gitspace_infra::{InstanceInfo, PortMapping};
    use gitspace_store::{CodeRepo, GitspaceAccessType, GitspaceState, InfraProviderType};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<GitspaceEventType>>);

    impl EventEmitter for Recorder {
        fn emit(&self, event: GitspaceEvent) {
            self.0.lock().push(event.event);
        }
    }

    fn config(ide: IdeType) -> GitspaceConfig {
        GitspaceConfig {
            id: GitspaceConfigId::new(1),
            identifier: "ws".to_string(),
            name: "ws".to_string(),
            space_id: SpaceId::new(1),
            space_path: "acme".to_string(),
            ide,
            code_repo: CodeRepo {
                url: "https://git.example.com/acme/widgets.git".to_string(),
                branch: "main".to_string(),
                devcontainer_path: None,
            },
            infra_provider_resource_id: InfraProviderResourceId::new(1),
            state: GitspaceState::Starting,
            user_id: "alice".to_string(),
            ssh_token_identifier: None,
            is_marked_for_deletion: false,
            is_deleted: false,
            created: Utc::now(),
            updated: Utc::now(),
            instance: None,
        }
    }

    fn instance(state: GitspaceInstanceState) -> GitspaceInstance {
        GitspaceInstance {
            id: GitspaceInstanceId::new(4),
            gitspace_config_id: GitspaceConfigId::new(1),
            identifier: "ws-abc123".to_string(),
            state,
            url: None,
            access_type: GitspaceAccessType::JwtToken,
            access_key_ref: None,
            machine_user: None,
            space_id: SpaceId::new(1),
            space_path: "acme".to_string(),
            last_used: None,
            last_heartbeat: None,
            active_time_started: None,
            active_time_ended: None,
            total_time_used_ms: 0,
            error_message: None,
            created: Utc::now(),
            updated: Utc::now(),
        }
    }

    fn infra(status: InfraStatus) -> Infrastructure {
        Infrastructure {
            identifier: "ws-abc123".to_string(),
            space_id: SpaceId::new(1),
            space_path: "acme".to_string(),
            gitspace_config_identifier: "ws".to_string(),
            gitspace_instance_id: GitspaceInstanceId::new(4),
            provider_type: InfraProviderType::HybridVmGcp,
            input_parameters: Vec::new(),
            agent_host: Some("10.0.0.5".to_string()),
            agent_port: 8083,
            proxy_agent_host: None,
            proxy_agent_port: None,
            gateway_host: None,
            storage_identifier: None,
            port_mappings: BTreeMap::from([(
                VS_CODE_WEB_PORT,
                PortMapping {
                    published_port: 40_000,
                    forwarded_port: VS_CODE_WEB_PORT,
                },
            )]),
            instance_info: InstanceInfo::default(),
            routing_key: None,
            status,
        }
    }

    #[test]
    fn start_success_runs_with_url() {
        let recorder = Arc::new(Recorder::default());
        let resumer = GitspaceResumer::new(recorder.clone());
        let config = config(IdeType::VsCodeWeb);
        let mut instance = instance(GitspaceInstanceState::Starting);

        resumer.resume_start(&config, &mut instance, &infra(InfraStatus::Provisioned), None);

        assert_eq!(instance.state, GitspaceInstanceState::Running);
        assert_eq!(
            instance.url.as_deref(),
            Some("http://10.0.0.5:40000/?folder=/home/vscode/widgets")
        );
        assert!(instance.active_time_started.is_some());
        assert_eq!(
            *recorder.0.lock(),
            vec![
                GitspaceEventType::InfraProvisioningCompleted,
                GitspaceEventType::GitspaceActionStartCompleted
            ]
        );
    }

    #[test]
    fn start_failure_records_error() {
        let resumer = GitspaceResumer::new(Arc::new(Recorder::default()));
        let config = config(IdeType::VsCode);
        let mut instance = instance(GitspaceInstanceState::Starting);

        resumer.resume_start(
            &config,
            &mut instance,
            &infra(InfraStatus::Error),
            Some("quota exceeded"),
        );

        assert_eq!(instance.state, GitspaceInstanceState::Error);
        assert_eq!(instance.error_message.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn stop_accumulates_active_time() {
        let resumer = GitspaceResumer::new(Arc::new(Recorder::default()));
        let config = config(IdeType::VsCode);
        let mut instance = instance(GitspaceInstanceState::Stopping);
        instance.active_time_started = Some(Utc::now() - chrono::Duration::minutes(2));
        instance.total_time_used_ms = 1_000;

        resumer.resume_stop(&config, &mut instance, &infra(InfraStatus::Stopped), None);

        assert_eq!(instance.state, GitspaceInstanceState::Stopped);
        assert!(instance.active_time_ended.is_some());
        assert!(instance.total_time_used_ms >= 1_000 + 120_000);
    }

    #[test]
    fn delete_marks_config_deleted() {
        let resumer = GitspaceResumer::new(Arc::new(Recorder::default()));
        let mut config = config(IdeType::VsCode);
        let mut instance = instance(GitspaceInstanceState::Deleting);

        resumer.resume_delete(&mut config, &mut instance, &infra(InfraStatus::Destroyed), None);

        assert_eq!(instance.state, GitspaceInstanceState::Deleted);
        assert!(config.is_deleted);
    }

    #[test]
    fn desktop_urls_use_ssh_port() {
        let config = config(IdeType::Intellij);
        let mut instance = instance(GitspaceInstanceState::Running);
        instance.machine_user = Some("dev".to_string());

        let url = ide_url(&config, &instance, &infra(InfraStatus::Provisioned)).unwrap();
        assert!(url.starts_with("jetbrains-gateway://connect#host=10.0.0.5&port=8088&user=dev"));
    }
}
