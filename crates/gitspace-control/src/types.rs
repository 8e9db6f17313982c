//! Request types and configuration for control plane operations.

use std::time::Duration;

use gitspace_infra::{GitspacePort, PortProtocol};
use gitspace_store::IdeType;
use serde::{Deserialize, Serialize};

/// Action a user can request on a gitspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitspaceActionType {
    /// Provision infrastructure and bring the IDE up.
    Start,
    /// Stop infrastructure, keeping user data.
    Stop,
    /// Mark the gitspace for deletion and release all infrastructure.
    Delete,
}

impl GitspaceActionType {
    /// Stable string form used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Delete => "delete",
        }
    }
}

/// A user request to act on a gitspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Requested action.
    pub action: GitspaceActionType,
    /// Gitspace config identifier.
    pub identifier: String,
    /// Path of the owning space. Required.
    #[serde(default)]
    pub space_ref: Option<String>,
}

impl ActionRequest {
    /// Build a request for a gitspace in a space.
    #[must_use]
    pub fn new(
        action: GitspaceActionType,
        space_ref: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            action,
            identifier: identifier.into(),
            space_ref: Some(space_ref.into()),
        }
    }
}

/// Options carried into an infrastructure trigger.
#[derive(Debug, Clone, Default)]
pub struct InfraEventOpts {
    /// Ports the gitspace needs exposed.
    pub required_ports: Vec<GitspacePort>,
    /// Whether deprovisioning may remove storage holding user data.
    pub delete_user_data: bool,
}

/// Port the browser IDE is served on inside the gitspace.
pub const VS_CODE_WEB_PORT: u16 = 8089;
/// SSH port desktop IDEs connect to inside the gitspace.
pub const SSH_PORT: u16 = 8088;

/// Ports an IDE needs exposed.
#[must_use]
pub fn ide_ports(ide: IdeType) -> Vec<GitspacePort> {
    match ide {
        IdeType::VsCodeWeb => vec![GitspacePort {
            port: VS_CODE_WEB_PORT,
            protocol: PortProtocol::Http,
        }],
        IdeType::VsCode | IdeType::Intellij => vec![GitspacePort {
            port: SSH_PORT,
            protocol: PortProtocol::Ssh,
        }],
    }
}

/// Configuration for the control plane service.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// How long an instance may sit in a busy state before it is considered stuck (seconds).
    pub busy_action_timeout_seconds: u64,
    /// How long a pending provisioning record blocks a new attempt (seconds).
    pub pending_provision_timeout_seconds: u64,
    /// Port the gitspace agent listens on in freshly provisioned infrastructure.
    pub agent_port: u16,
    /// Whether SSH traffic is routed through an SSH piper.
    pub use_ssh_piper: bool,
    /// Upper bound on concurrently running background tasks.
    pub max_background_tasks: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            busy_action_timeout_seconds: 300,       // 5 minutes
            pending_provision_timeout_seconds: 600, // 10 minutes
            agent_port: 8083,
            use_ssh_piper: false,
            max_background_tasks: 32,
        }
    }
}

impl ControlConfig {
    /// Load configuration from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse("GITSPACE_BUSY_ACTION_TIMEOUT_SECS") {
            config.busy_action_timeout_seconds = val;
        }
        if let Some(val) = env_parse("GITSPACE_PENDING_PROVISION_TIMEOUT_SECS") {
            config.pending_provision_timeout_seconds = val;
        }
        if let Some(val) = env_parse("GITSPACE_AGENT_PORT") {
            config.agent_port = val;
        }
        if let Some(val) = env_parse("GITSPACE_USE_SSH_PIPER") {
            config.use_ssh_piper = val;
        }
        if let Some(val) = env_parse::<usize>("GITSPACE_MAX_BACKGROUND_TASKS") {
            config.max_background_tasks = val.max(1);
        }

        config
    }

    /// Busy window as a duration.
    #[must_use]
    pub const fn busy_action_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_action_timeout_seconds)
    }

    /// Pending provisioning window as a duration.
    #[must_use]
    pub const fn pending_provision_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_provision_timeout_seconds)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            tracing::warn!(var = %name, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}
