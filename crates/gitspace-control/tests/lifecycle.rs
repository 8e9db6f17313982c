//! End-to-end lifecycle tests: action service, background tasks, provisioner and
//! completion listener over a real `RocksDB` store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use gitspace_control::{
    ActionRequest, AllowAllAuthorizer, AuthSession, Authorizer, AuthzError, BackgroundTasks,
    ControlConfig, ControlError, EventEmitter, EventMessages, GitspaceActionType,
    GitspaceActions, GitspaceResumer, GitspaceService, InfraEventListener, InfraProvisioner,
    Permission, StoreEventEmitter,
};
use gitspace_core::{
    naming, GitspaceConfigId, GitspaceInstanceId, InfraProviderConfigId, InfraProviderResourceId,
    InfraProviderTemplateId, SpaceId,
};
use gitspace_infra::{
    volume_name, ChannelSink, DockerProvider, DockerProviderConfig, InfraEvent, InfraEventReport,
    InfraProvider, InfraProviderFactory, Infrastructure, MemoryDockerEngine, MockInfraProvider,
    ProvisioningType,
};
use gitspace_store::{
    CodeRepo, GitspaceAccessType, GitspaceConfig, GitspaceEntityType, GitspaceInstanceState,
    GitspaceState, IdeType, InfraProviderConfig, InfraProviderResource, InfraProviderTemplate,
    InfraProviderType, InfraProvisioned, InfraStatus, RocksStore, Space, Store,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

const SPACE: &str = "acme";
const GITSPACE: &str = "ws";

// =============================================================================
// Harness
// =============================================================================

struct Seed {
    ide: IdeType,
    ssh_token_identifier: Option<String>,
    template_data: Option<String>,
}

impl Default for Seed {
    fn default() -> Self {
        Self {
            ide: IdeType::VsCodeWeb,
            ssh_token_identifier: None,
            template_data: None,
        }
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<RocksStore>,
    service: GitspaceService<RocksStore>,
    provisioner: Arc<InfraProvisioner<RocksStore>>,
    listener: InfraEventListener<RocksStore>,
    completions: UnboundedReceiver<InfraEventReport>,
    resource: InfraProviderResource,
}

impl Harness {
    fn new(
        provider: Arc<dyn InfraProvider>,
        completions: UnboundedReceiver<InfraEventReport>,
        control: ControlConfig,
        authorizer: Arc<dyn Authorizer>,
        seed: Seed,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let provider_type = provider.provider_type();
        let now = Utc::now();

        let mut space = Space {
            id: SpaceId::new(0),
            path: SPACE.to_string(),
            parent_id: None,
            created: now,
        };
        store.create_space(&mut space).unwrap();

        let mut provider_config = InfraProviderConfig {
            id: InfraProviderConfigId::new(0),
            identifier: "pool".to_string(),
            name: "pool".to_string(),
            space_id: space.id,
            provider_type,
            metadata: BTreeMap::from([("project".to_string(), serde_json::json!("demo"))]),
            created: now,
            updated: now,
        };
        store.create_infra_provider_config(&mut provider_config).unwrap();

        let template_identifier = seed.template_data.map(|data| {
            let mut template = InfraProviderTemplate {
                id: InfraProviderTemplateId::new(0),
                identifier: "base".to_string(),
                infra_provider_config_id: provider_config.id,
                space_id: space.id,
                data,
                description: String::new(),
                created: now,
                updated: now,
            };
            store.create_infra_provider_template(&mut template).unwrap();
            template.identifier
        });

        let mut resource = InfraProviderResource {
            id: InfraProviderResourceId::new(0),
            identifier: "small".to_string(),
            name: "small".to_string(),
            infra_provider_config_id: provider_config.id,
            space_id: space.id,
            provider_type,
            cpu: Some("2".to_string()),
            memory: Some("4Gi".to_string()),
            disk: None,
            network: None,
            region: None,
            gateway_host: Some("gw.example.com".to_string()),
            gateway_port: None,
            template_identifier,
            metadata: BTreeMap::from([
                ("zone".to_string(), "us-east1-b".to_string()),
                ("empty".to_string(), String::new()),
            ]),
            created: now,
            updated: now,
        };
        store.create_infra_provider_resource(&mut resource).unwrap();

        let mut config = GitspaceConfig {
            id: GitspaceConfigId::new(0),
            identifier: GITSPACE.to_string(),
            name: "Workspace".to_string(),
            space_id: space.id,
            space_path: SPACE.to_string(),
            ide: seed.ide,
            code_repo: CodeRepo {
                url: "https://git.example.com/acme/widgets.git".to_string(),
                branch: "main".to_string(),
                devcontainer_path: None,
            },
            infra_provider_resource_id: resource.id,
            state: GitspaceState::Uninitialized,
            user_id: "alice".to_string(),
            ssh_token_identifier: seed.ssh_token_identifier,
            is_marked_for_deletion: false,
            is_deleted: false,
            created: now,
            updated: now,
            instance: None,
        };
        store.create_gitspace_config(&mut config).unwrap();

        let factory = InfraProviderFactory::builder().register(provider).build();
        let provisioner = Arc::new(InfraProvisioner::new(
            store.clone(),
            factory,
            control.clone(),
        ));
        let emitter: Arc<dyn EventEmitter> = Arc::new(StoreEventEmitter::new(
            store.clone(),
            Arc::new(EventMessages::new()),
        ));
        let listener = InfraEventListener::new(
            store.clone(),
            provisioner.clone(),
            Arc::new(GitspaceResumer::new(emitter.clone())),
        );
        let tasks = BackgroundTasks::new(control.max_background_tasks, CancellationToken::new());
        let service = GitspaceService::new(
            store.clone(),
            provisioner.clone(),
            authorizer,
            emitter,
            tasks,
            control,
        );

        Self {
            _dir: dir,
            store,
            service,
            provisioner,
            listener,
            completions,
            resource,
        }
    }

    async fn act(&self, action: GitspaceActionType) -> Result<GitspaceConfig, ControlError> {
        self.service
            .action(
                &AuthSession::new("alice"),
                ActionRequest::new(action, SPACE, GITSPACE),
            )
            .await
    }

    /// Wait for background work, then apply every completion reported so far.
    async fn settle(&mut self) {
        self.service.tasks().drain().await;
        while let Ok(report) = self.completions.try_recv() {
            self.listener.handle(&report).unwrap();
        }
    }

    async fn gitspace(&self) -> GitspaceConfig {
        self.service
            .find_gitspace(&AuthSession::new("alice"), SPACE, GITSPACE)
            .await
            .unwrap()
    }

    fn stored_config(&self) -> GitspaceConfig {
        let space = self.store.find_space_by_path(SPACE).unwrap().unwrap();
        self.store
            .find_gitspace_config_by_identifier(space.id, GITSPACE)
            .unwrap()
            .unwrap()
    }

    fn latest_record(&self, instance_id: GitspaceInstanceId) -> Option<InfraProvisioned> {
        self.store.find_latest_infra_provisioned(instance_id).unwrap()
    }

    fn backdate_instance(&self, instance_id: GitspaceInstanceId, by: Duration) {
        let mut instance = self
            .store
            .get_gitspace_instance(instance_id)
            .unwrap()
            .unwrap();
        instance.updated = Utc::now() - by;
        self.store.update_gitspace_instance(&instance).unwrap();
    }

    fn backdate_latest_record(&self, instance_id: GitspaceInstanceId, by: Duration) {
        let mut record = self.latest_record(instance_id).unwrap();
        record.updated = Utc::now() - by;
        self.store.update_infra_provisioned(&record).unwrap();
    }

    fn instance_events(&self, instance_id: GitspaceInstanceId) -> Vec<String> {
        self.store
            .list_gitspace_events(GitspaceEntityType::GitspaceInstance, instance_id.get())
            .unwrap()
            .into_iter()
            .map(|e| e.event)
            .collect()
    }
}

fn mock_harness_with(
    customize: impl FnOnce(MockInfraProvider) -> MockInfraProvider,
    control: ControlConfig,
    seed: Seed,
) -> (Harness, Arc<MockInfraProvider>) {
    let (sink, completions) = ChannelSink::channel();
    let mock = Arc::new(customize(MockInfraProvider::new(
        InfraProviderType::HybridVmGcp,
        ProvisioningType::New,
        Arc::new(sink),
    )));
    let harness = Harness::new(
        mock.clone(),
        completions,
        control,
        Arc::new(AllowAllAuthorizer),
        seed,
    );
    (harness, mock)
}

fn mock_harness() -> (Harness, Arc<MockInfraProvider>) {
    mock_harness_with(|m| m, ControlConfig::default(), Seed::default())
}

fn docker_harness() -> (Harness, Arc<MemoryDockerEngine>) {
    let (sink, completions) = ChannelSink::channel();
    let engine = Arc::new(MemoryDockerEngine::new());
    let docker = DockerProvider::new(
        engine.clone(),
        Arc::new(sink),
        DockerProviderConfig::default(),
    );
    let harness = Harness::new(
        Arc::new(docker),
        completions,
        ControlConfig::default(),
        Arc::new(AllowAllAuthorizer),
        Seed::default(),
    );
    (harness, engine)
}

fn instance_id(config: &GitspaceConfig) -> GitspaceInstanceId {
    config.instance.as_ref().unwrap().id
}

// =============================================================================
// Start
// =============================================================================

#[tokio::test]
async fn start_provisions_and_runs_gitspace() {
    let (mut h, mock) = mock_harness();

    let accepted = h.act(GitspaceActionType::Start).await.unwrap();
    assert_eq!(accepted.state, GitspaceState::Starting);
    let instance = accepted.instance.clone().unwrap();
    assert_eq!(instance.state, GitspaceInstanceState::Starting);
    assert!(instance.identifier.starts_with("ws-"));
    assert_eq!(instance.access_type, GitspaceAccessType::JwtToken);

    h.settle().await;

    let record = h.latest_record(instance.id).unwrap();
    assert_eq!(record.infra_status, InfraStatus::Provisioned);
    assert_eq!(record.server_host_ip.as_deref(), Some("10.0.0.5"));
    assert_eq!(record.server_host_port.as_deref(), Some("8083"));
    assert_eq!(record.gateway_host.as_deref(), Some("gw.example.com"));
    let infra = Infrastructure::from_json(record.response_metadata.as_deref().unwrap()).unwrap();
    assert_eq!(infra.status, InfraStatus::Provisioned);

    let gitspace = h.gitspace().await;
    assert_eq!(gitspace.state, GitspaceState::Running);
    let running = gitspace.instance.unwrap();
    assert_eq!(running.state, GitspaceInstanceState::Running);
    assert_eq!(
        running.url.as_deref(),
        Some("http://10.0.0.5:40000/?folder=/home/vscode/widgets")
    );
    assert_eq!(mock.call_count(InfraEvent::Provision), 1);

    let events = h.instance_events(instance.id);
    assert!(events.contains(&"infra_provisioning_start".to_string()));
    assert!(events.contains(&"infra_provisioning_completed".to_string()));
    assert!(events.contains(&"gitspace_action_start_completed".to_string()));
}

#[tokio::test]
async fn start_on_running_gitspace_is_a_no_op() {
    let (mut h, mock) = mock_harness();
    let first = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;

    let again = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;

    assert_eq!(instance_id(&again), instance_id(&first));
    assert_eq!(again.instance.unwrap().state, GitspaceInstanceState::Running);
    assert_eq!(mock.call_count(InfraEvent::Provision), 1);
}

#[tokio::test]
async fn start_while_starting_is_rejected() {
    let (mut h, mock) = mock_harness();
    mock.set_report_completions(false);

    h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;

    let err = h.act(GitspaceActionType::Start).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::ActionPending {
            state: GitspaceInstanceState::Starting,
            ..
        }
    ));
    assert_eq!(err.http_status_code(), 409);
    assert_eq!(mock.call_count(InfraEvent::Provision), 1);
}

#[tokio::test]
async fn stuck_instance_is_forced_to_error_and_restarted() {
    let (mut h, mock) = mock_harness();
    mock.set_report_completions(false);

    let stuck = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    h.backdate_instance(instance_id(&stuck), Duration::minutes(6));

    mock.set_report_completions(true);
    let restarted = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;

    assert_ne!(instance_id(&restarted), instance_id(&stuck));
    let old = h
        .store
        .get_gitspace_instance(instance_id(&stuck))
        .unwrap()
        .unwrap();
    assert_eq!(old.state, GitspaceInstanceState::Error);
    assert!(old.error_message.is_some());
    // The abandoned attempt no longer looks in flight.
    assert_eq!(
        h.latest_record(old.id).unwrap().infra_status,
        InfraStatus::Unknown
    );

    let gitspace = h.gitspace().await;
    assert_eq!(gitspace.state, GitspaceState::Running);
    assert_eq!(mock.call_count(InfraEvent::Provision), 2);
}

#[tokio::test]
async fn stuck_instance_is_forced_to_error_on_stop() {
    let (mut h, mock) = mock_harness();
    mock.set_report_completions(false);

    let stuck = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    let id = instance_id(&stuck);
    h.backdate_instance(id, Duration::minutes(6));

    let stopping = h.act(GitspaceActionType::Stop).await.unwrap();
    assert_eq!(instance_id(&stopping), id);
    assert_eq!(stopping.state, GitspaceState::Stopping);
    assert_eq!(
        stopping.instance.as_ref().unwrap().state,
        GitspaceInstanceState::Stopping
    );
    assert!(h
        .instance_events(id)
        .contains(&"gitspace_action_timed_out".to_string()));

    h.settle().await;

    // The stuck attempt never provisioned anything, so there is nothing to stop.
    assert_eq!(mock.call_count(InfraEvent::Stop), 0);
    assert_eq!(h.latest_record(id).unwrap().infra_status, InfraStatus::Unknown);
    let gitspace = h.gitspace().await;
    assert_eq!(gitspace.state, GitspaceState::Error);
    let instance = gitspace.instance.unwrap();
    assert_eq!(instance.state, GitspaceInstanceState::Error);
    assert!(h
        .instance_events(id)
        .contains(&"gitspace_action_stop_failed".to_string()));

    // Not left busy: a new start goes through.
    mock.set_report_completions(true);
    let restarted = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    assert_ne!(instance_id(&restarted), id);
    assert_eq!(h.gitspace().await.state, GitspaceState::Running);
}

#[tokio::test]
async fn restart_reuses_stopped_infrastructure() {
    let (mut h, mock) = mock_harness();
    let first = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    assert!(mock.last_existing_infra().is_none());

    h.act(GitspaceActionType::Stop).await.unwrap();
    h.settle().await;
    let first_id = instance_id(&first);
    assert_eq!(
        h.latest_record(first_id).unwrap().infra_status,
        InfraStatus::Stopped
    );

    mock.set_report_completions(false);
    let second = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    let second_id = instance_id(&second);
    assert_ne!(second_id, first_id);

    let reused = mock.last_existing_infra().unwrap();
    assert_eq!(reused.gitspace_instance_id, first_id);
    assert_eq!(reused.status, InfraStatus::Stopped);
    assert_eq!(reused.instance_info.id.as_deref(), Some("mock-machine"));

    let pending = h.latest_record(second_id).unwrap();
    assert_eq!(pending.infra_status, InfraStatus::Pending);
    let descriptor =
        Infrastructure::from_json(pending.response_metadata.as_deref().unwrap()).unwrap();
    assert_eq!(descriptor.instance_info.id.as_deref(), Some("mock-machine"));
}

#[tokio::test]
async fn failed_run_is_not_reused() {
    let (mut h, mock) = mock_harness();
    h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    h.act(GitspaceActionType::Stop).await.unwrap();
    h.settle().await;

    mock.set_fail_provision(true);
    h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    assert!(mock.last_existing_infra().is_some());

    // The newest run ended Unknown, so the older stopped descriptor is stale.
    mock.set_fail_provision(false);
    let config = h.gitspace().await;
    assert!(h
        .provisioner
        .get_stopped_infra_from_stored_info(&config)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn synchronous_provider_failure_marks_record_unknown() {
    let (mut h, mock) = mock_harness();
    mock.set_fail_provision(true);

    let accepted = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;

    let id = instance_id(&accepted);
    assert_eq!(h.latest_record(id).unwrap().infra_status, InfraStatus::Unknown);

    let gitspace = h.gitspace().await;
    assert_eq!(gitspace.state, GitspaceState::Error);
    let instance = gitspace.instance.unwrap();
    assert_eq!(instance.state, GitspaceInstanceState::Error);
    assert!(instance
        .error_message
        .unwrap()
        .contains("mock provision failure"));
    assert!(h
        .instance_events(id)
        .contains(&"gitspace_action_start_failed".to_string()));
}

#[tokio::test]
async fn invalid_params_fail_before_any_record() {
    let (mut h, mock) = mock_harness_with(
        |m| m.with_required_param("machine_type"),
        ControlConfig::default(),
        Seed::default(),
    );

    let accepted = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;

    assert!(h.latest_record(instance_id(&accepted)).is_none());
    assert_eq!(mock.call_count(InfraEvent::Provision), 0);
    let instance = h.gitspace().await.instance.unwrap();
    assert_eq!(instance.state, GitspaceInstanceState::Error);
}

#[tokio::test]
async fn ssh_piper_routing_key_is_recorded() {
    let control = ControlConfig {
        use_ssh_piper: true,
        ..ControlConfig::default()
    };
    let seed = Seed {
        ide: IdeType::VsCode,
        ssh_token_identifier: Some("alice-key".to_string()),
        ..Seed::default()
    };
    let (mut h, _mock) = mock_harness_with(|m| m, control, seed);

    let accepted = h.act(GitspaceActionType::Start).await.unwrap();
    assert_eq!(
        accepted.instance.as_ref().unwrap().access_type,
        GitspaceAccessType::SshKey
    );
    h.settle().await;

    let record = h.latest_record(instance_id(&accepted)).unwrap();
    let infra = Infrastructure::from_json(record.response_metadata.as_deref().unwrap()).unwrap();
    assert_eq!(
        infra.routing_key.as_deref(),
        Some(naming::routing_key(SPACE, GITSPACE).as_str())
    );
}

// =============================================================================
// Provisioner
// =============================================================================

#[tokio::test]
async fn duplicate_provisioning_is_rejected_while_pending() {
    let (mut h, mock) = mock_harness();
    mock.set_report_completions(false);

    let accepted = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    let id = instance_id(&accepted);
    assert_eq!(h.latest_record(id).unwrap().infra_status, InfraStatus::Pending);

    let err = h
        .provisioner
        .trigger_infra_event(InfraEvent::Provision, &accepted, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::AlreadyProvisioning(_)));
    assert_eq!(mock.call_count(InfraEvent::Provision), 1);
}

#[tokio::test]
async fn stale_pending_record_is_recovered() {
    let (mut h, mock) = mock_harness();
    mock.set_report_completions(false);

    let accepted = h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    let id = instance_id(&accepted);
    h.backdate_latest_record(id, Duration::minutes(11));

    mock.set_report_completions(true);
    h.provisioner
        .trigger_infra_event(InfraEvent::Provision, &accepted, None)
        .await
        .unwrap();
    h.settle().await;

    let records = h.store.list_infra_provisioned_by_instance(id).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].infra_status, InfraStatus::Unknown);
    assert_eq!(records[1].infra_status, InfraStatus::Provisioned);
    assert_eq!(mock.call_count(InfraEvent::Provision), 2);

    let instance = h.gitspace().await.instance.unwrap();
    assert_eq!(instance.state, GitspaceInstanceState::Running);
}

#[tokio::test]
async fn deprovision_of_destroyed_infra_is_idempotent() {
    let (mut h, mock) = mock_harness();
    h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;

    let config = h.gitspace().await;
    let infra = h
        .provisioner
        .find_infra(&config, InfraEvent::Deprovision, &[InfraStatus::Provisioned])
        .await
        .unwrap();
    h.provisioner
        .trigger_infra_event(InfraEvent::Deprovision, &config, Some(&infra))
        .await
        .unwrap();
    h.settle().await;
    assert_eq!(
        h.latest_record(infra.gitspace_instance_id)
            .unwrap()
            .infra_status,
        InfraStatus::Destroyed
    );

    for _ in 0..2 {
        h.provisioner
            .trigger_infra_event(InfraEvent::Deprovision, &config, Some(&infra))
            .await
            .unwrap();
    }
    assert_eq!(mock.call_count(InfraEvent::Deprovision), 1);
}

#[tokio::test]
async fn params_merge_template_and_resource_metadata() {
    let seed = Seed {
        template_data: Some(
            r#"[{"name":"image","value":"ubuntu:24.04"},{"name":"","value":"ignored"}]"#
                .to_string(),
        ),
        ..Seed::default()
    };
    let (h, _mock) = mock_harness_with(|m| m, ControlConfig::default(), seed);

    let (params, metadata) = h.provisioner.get_all_params_from_db(&h.resource).unwrap();
    let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["image", "zone"]);
    assert_eq!(metadata.get("project"), Some(&serde_json::json!("demo")));
}

#[tokio::test]
async fn cleanup_marks_instance_cleaned() {
    let (mut h, mock) = mock_harness();
    h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    h.act(GitspaceActionType::Stop).await.unwrap();
    h.settle().await;

    let config = h.gitspace().await;
    let stored = h.latest_record(instance_id(&config)).unwrap();
    let infra = Infrastructure::from_json(stored.response_metadata.as_deref().unwrap()).unwrap();
    h.provisioner
        .trigger_infra_event(InfraEvent::Cleanup, &config, Some(&infra))
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(mock.call_count(InfraEvent::Cleanup), 1);
    let instance = h.gitspace().await.instance.unwrap();
    assert_eq!(instance.state, GitspaceInstanceState::Cleaned);
    let cleanup_events: Vec<String> = h
        .instance_events(instance.id)
        .into_iter()
        .filter(|e| e.starts_with("infra_cleanup"))
        .collect();
    assert_eq!(cleanup_events, vec!["infra_cleanup_completed".to_string()]);
}

// =============================================================================
// Stop and delete
// =============================================================================

#[tokio::test]
async fn stop_requires_a_running_gitspace() {
    let (h, _mock) = mock_harness();
    let err = h.act(GitspaceActionType::Stop).await.unwrap_err();
    assert!(matches!(err, ControlError::NotRunning(_)));
}

#[tokio::test]
async fn stop_closes_the_active_window() {
    let (mut h, mock) = mock_harness();
    h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;

    let stopping = h.act(GitspaceActionType::Stop).await.unwrap();
    assert_eq!(stopping.state, GitspaceState::Stopping);
    h.settle().await;

    let gitspace = h.gitspace().await;
    assert_eq!(gitspace.state, GitspaceState::Stopped);
    let instance = gitspace.instance.unwrap();
    assert_eq!(instance.state, GitspaceInstanceState::Stopped);
    assert!(instance.active_time_ended.is_some());
    assert!(instance.url.is_none());
    assert_eq!(
        h.latest_record(instance.id).unwrap().infra_status,
        InfraStatus::Stopped
    );
    assert_eq!(mock.call_count(InfraEvent::Stop), 1);

    // A restart creates a fresh instance.
    let restarted = h.act(GitspaceActionType::Start).await.unwrap();
    assert_ne!(instance_id(&restarted), instance.id);
}

#[tokio::test]
async fn delete_deprovisions_with_user_data() {
    let (mut h, mock) = mock_harness();
    h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;

    let deleting = h.act(GitspaceActionType::Delete).await.unwrap();
    assert!(deleting.is_marked_for_deletion);
    assert_eq!(
        deleting.instance.as_ref().unwrap().state,
        GitspaceInstanceState::Deleting
    );
    h.settle().await;

    assert_eq!(mock.last_can_delete_user_data(), Some(true));
    let stored = h.stored_config();
    assert!(stored.is_deleted);
    let instance = h
        .store
        .get_gitspace_instance(instance_id(&deleting))
        .unwrap()
        .unwrap();
    assert_eq!(instance.state, GitspaceInstanceState::Deleted);

    let err = h
        .service
        .find_gitspace(&AuthSession::new("alice"), SPACE, GITSPACE)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::GitspaceNotFound(_)));
}

#[tokio::test]
async fn delete_without_instance_completes_immediately() {
    let (h, mock) = mock_harness();
    let deleted = h.act(GitspaceActionType::Delete).await.unwrap();
    assert!(deleted.is_deleted);
    assert!(h.stored_config().is_deleted);
    assert_eq!(mock.call_count(InfraEvent::Deprovision), 0);
}

// =============================================================================
// Docker provider
// =============================================================================

#[tokio::test]
async fn docker_stop_preserves_volume_and_delete_removes_it() {
    let (mut h, engine) = docker_harness();
    let volume = volume_name(SPACE, GITSPACE);

    h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;
    let running = h.gitspace().await;
    assert_eq!(running.state, GitspaceState::Running);
    assert!(engine.volume_names().contains(&volume));
    // Existing-type providers keep no provisioned record.
    assert!(h.latest_record(instance_id(&running)).is_none());

    h.act(GitspaceActionType::Stop).await.unwrap();
    h.settle().await;
    assert_eq!(h.gitspace().await.state, GitspaceState::Stopped);
    assert!(engine.volume_names().contains(&volume));

    h.act(GitspaceActionType::Delete).await.unwrap();
    h.settle().await;
    assert!(!engine.volume_names().contains(&volume));
    assert!(h.stored_config().is_deleted);
}

#[tokio::test]
async fn docker_engine_outage_fails_the_start() {
    let (mut h, engine) = docker_harness();
    engine.set_unreachable(true);

    h.act(GitspaceActionType::Start).await.unwrap();
    h.settle().await;

    let gitspace = h.gitspace().await;
    assert_eq!(gitspace.state, GitspaceState::Error);
    assert!(engine.volume_names().is_empty());
}

// =============================================================================
// Request validation
// =============================================================================

struct DenyAll;

#[async_trait]
impl Authorizer for DenyAll {
    async fn check(
        &self,
        session: &AuthSession,
        space_path: &str,
        identifier: &str,
        permission: Permission,
    ) -> Result<(), AuthzError> {
        Err(AuthzError {
            principal: session.principal_uid.clone(),
            permission,
            space_path: space_path.to_string(),
            identifier: identifier.to_string(),
        })
    }
}

#[tokio::test]
async fn requests_are_validated_before_any_work() {
    let (h, mock) = mock_harness();
    let session = AuthSession::new("alice");

    let missing_space = ActionRequest {
        action: GitspaceActionType::Start,
        identifier: GITSPACE.to_string(),
        space_ref: None,
    };
    let err = h.service.action(&session, missing_space).await.unwrap_err();
    assert!(matches!(err, ControlError::MissingSpaceRef));

    let unknown_space = ActionRequest::new(GitspaceActionType::Start, "nowhere", GITSPACE);
    let err = h.service.action(&session, unknown_space).await.unwrap_err();
    assert!(matches!(err, ControlError::SpaceNotFound(_)));

    let bad_identifier = ActionRequest::new(GitspaceActionType::Start, SPACE, "bad/id");
    let err = h.service.action(&session, bad_identifier).await.unwrap_err();
    assert!(matches!(err, ControlError::InvalidIdentifier(_)));

    let unknown_gitspace = ActionRequest::new(GitspaceActionType::Start, SPACE, "other");
    let err = h.service.action(&session, unknown_gitspace).await.unwrap_err();
    assert!(matches!(err, ControlError::GitspaceNotFound(_)));

    assert_eq!(mock.call_count(InfraEvent::Provision), 0);
}

#[tokio::test]
async fn forbidden_actions_are_rejected() {
    let (sink, completions) = ChannelSink::channel();
    let mock = Arc::new(MockInfraProvider::new(
        InfraProviderType::HybridVmAws,
        ProvisioningType::New,
        Arc::new(sink),
    ));
    let h = Harness::new(
        mock.clone(),
        completions,
        ControlConfig::default(),
        Arc::new(DenyAll),
        Seed::default(),
    );

    let err = h.act(GitspaceActionType::Start).await.unwrap_err();
    assert!(matches!(err, ControlError::Forbidden(_)));
    assert_eq!(err.http_status_code(), 403);
    let config = h.stored_config();
    assert!(h
        .store
        .find_latest_gitspace_instance(config.id)
        .unwrap()
        .is_none());
    assert_eq!(mock.call_count(InfraEvent::Provision), 0);
}
