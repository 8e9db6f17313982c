//! Consumer of provider completion reports.

use std::sync::Arc;

use chrono::Utc;
use gitspace_infra::{InfraEvent, InfraEventReport};
use gitspace_store::Store;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::provisioner::InfraProvisioner;
use crate::resume::GitspaceResumer;

/// Applies completion reports to the provisioned record, the instance and the config.
pub struct InfraEventListener<S: Store> {
    store: Arc<S>,
    provisioner: Arc<InfraProvisioner<S>>,
    resumer: Arc<GitspaceResumer>,
}

impl<S: Store> InfraEventListener<S> {
    /// Create a listener.
    pub fn new(
        store: Arc<S>,
        provisioner: Arc<InfraProvisioner<S>>,
        resumer: Arc<GitspaceResumer>,
    ) -> Self {
        Self {
            store,
            provisioner,
            resumer,
        }
    }

    /// Apply one report.
    ///
    /// Reports for unknown instances are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is missing or persisting fails.
    pub fn handle(&self, report: &InfraEventReport) -> Result<()> {
        let infra = &report.infra;
        let Some(mut instance) = self.store.get_gitspace_instance(infra.gitspace_instance_id)?
        else {
            warn!(
                gitspace_instance_id = %infra.gitspace_instance_id,
                event = %report.event,
                "Dropping completion for unknown instance"
            );
            return Ok(());
        };
        let mut config = self
            .store
            .get_gitspace_config(instance.gitspace_config_id)?
            .ok_or_else(|| ControlError::GitspaceNotFound(infra.gitspace_config_identifier.clone()))?;

        debug!(
            gitspace = %config.identifier,
            event = %report.event,
            status = %infra.status,
            "Handling infra event completion"
        );

        self.provisioner
            .post_infra_event_complete(&config, infra, report.event)?;

        let error = report.error.as_deref();
        match report.event {
            InfraEvent::Provision => self.resumer.resume_start(&config, &mut instance, infra, error),
            InfraEvent::Stop => self.resumer.resume_stop(&config, &mut instance, infra, error),
            InfraEvent::Deprovision => {
                self.resumer
                    .resume_delete(&mut config, &mut instance, infra, error);
            }
            InfraEvent::Cleanup => {
                self.resumer
                    .resume_cleanup(&config, &mut instance, infra, error);
            }
        }
        self.store.update_gitspace_instance(&instance)?;

        let is_latest = self
            .store
            .find_latest_gitspace_instance(config.id)?
            .is_some_and(|latest| latest.id == instance.id);
        if is_latest {
            config.state = lifecycle::config_state(Some(instance.state));
        }
        config.updated = Utc::now();
        self.store.update_gitspace_config(&config)?;

        info!(
            gitspace = %config.identifier,
            instance = %instance.identifier,
            state = %instance.state,
            "Applied infra event completion"
        );
        Ok(())
    }

    /// Consume reports until the channel closes or shutdown is requested.
    pub async fn run(
        self: Arc<Self>,
        mut reports: UnboundedReceiver<InfraEventReport>,
        shutdown: CancellationToken,
    ) {
        info!("Infra event listener started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Infra event listener shutting down");
                    break;
                }
                report = reports.recv() => {
                    let Some(report) = report else {
                        info!("Infra event channel closed");
                        break;
                    };
                    if let Err(e) = self.handle(&report) {
                        error!(
                            event = %report.event,
                            gitspace_instance_id = %report.infra.gitspace_instance_id,
                            error = %e,
                            "Failed to apply infra event completion"
                        );
                    }
                }
            }
        }
    }
}
