//! Docker engine access.
//!
//! The provider only needs a handful of engine calls; they sit behind
//! [`DockerEngine`] so the provider can be exercised without a daemon.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::models::VolumeCreateRequest;
use bollard::query_parameters::RemoveVolumeOptionsBuilder;
use bollard::{Docker, API_DEFAULT_VERSION};
use tracing::debug;

use crate::types::InstanceInfo;
use crate::{InfraError, Result};

/// Timeout for engine requests, in seconds.
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Engine operations the Docker provider relies on.
#[async_trait]
pub trait DockerEngine: Send + Sync {
    /// Identity of the engine host.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be reached.
    async fn host_info(&self) -> Result<InstanceInfo>;

    /// Create a named volume. Creating an existing volume is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the request.
    async fn create_volume(&self, name: &str, labels: HashMap<String, String>) -> Result<()>;

    /// Whether a named volume exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    async fn volume_exists(&self, name: &str) -> Result<bool>;

    /// Remove a named volume. Removing a missing volume is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the request.
    async fn remove_volume(&self, name: &str) -> Result<()>;
}

fn is_not_found_error(error: &BollardError) -> bool {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => *status_code == 404,
        _ => false,
    }
}

/// [`DockerEngine`] backed by the bollard client.
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    /// Connect to the engine.
    ///
    /// With no socket path the client honours `DOCKER_HOST` and falls back to the
    /// platform default socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be constructed.
    pub fn connect(socket_path: Option<&str>) -> Result<Self> {
        let docker = match socket_path {
            Some(path) => Docker::connect_with_socket(path, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)?,
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self { docker })
    }
}

#[async_trait]
impl DockerEngine for BollardEngine {
    async fn host_info(&self) -> Result<InstanceInfo> {
        let info = self.docker.info().await?;
        Ok(InstanceInfo {
            id: info.id,
            name: info.name,
            os: info.operating_system,
            arch: info.architecture,
            agent_tls_cert: None,
        })
    }

    async fn create_volume(&self, name: &str, labels: HashMap<String, String>) -> Result<()> {
        let options = VolumeCreateRequest {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        };
        self.docker.create_volume(options).await?;
        debug!(volume = %name, "Created docker volume");
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found_error(&e) => Ok(false),
            Err(e) => Err(InfraError::from(e)),
        }
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let options = RemoveVolumeOptionsBuilder::default().force(false).build();
        match self.docker.remove_volume(name, Some(options)).await {
            Ok(()) => {
                debug!(volume = %name, "Removed docker volume");
                Ok(())
            }
            Err(e) if is_not_found_error(&e) => Ok(()),
            Err(e) => Err(InfraError::from(e)),
        }
    }
}

/// In-memory engine for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// A Docker engine that keeps volumes in a map.
    #[derive(Default)]
    pub struct MemoryDockerEngine {
        volumes: Mutex<BTreeMap<String, HashMap<String, String>>>,
        unreachable: Mutex<bool>,
    }

    impl MemoryDockerEngine {
        /// Create an empty engine.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every call fail as if the daemon were down.
        pub fn set_unreachable(&self, unreachable: bool) {
            *self.unreachable.lock() = unreachable;
        }

        /// Names of the volumes currently present.
        #[must_use]
        pub fn volume_names(&self) -> Vec<String> {
            self.volumes.lock().keys().cloned().collect()
        }

        /// Labels of a volume.
        #[must_use]
        pub fn volume_labels(&self, name: &str) -> Option<HashMap<String, String>> {
            self.volumes.lock().get(name).cloned()
        }

        fn check_reachable(&self) -> Result<()> {
            if *self.unreachable.lock() {
                return Err(InfraError::Docker("engine unreachable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DockerEngine for MemoryDockerEngine {
        async fn host_info(&self) -> Result<InstanceInfo> {
            self.check_reachable()?;
            Ok(InstanceInfo {
                id: Some("memory-engine".to_string()),
                name: Some("localhost".to_string()),
                os: Some("linux".to_string()),
                arch: Some("x86_64".to_string()),
                agent_tls_cert: None,
            })
        }

        async fn create_volume(&self, name: &str, labels: HashMap<String, String>) -> Result<()> {
            self.check_reachable()?;
            self.volumes
                .lock()
                .entry(name.to_string())
                .or_insert(labels);
            Ok(())
        }

        async fn volume_exists(&self, name: &str) -> Result<bool> {
            self.check_reachable()?;
            Ok(self.volumes.lock().contains_key(name))
        }

        async fn remove_volume(&self, name: &str) -> Result<()> {
            self.check_reachable()?;
            self.volumes.lock().remove(name);
            Ok(())
        }
    }
}
