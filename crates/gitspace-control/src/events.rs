//! Gitspace domain events.
//!
//! Events are fire-and-forget: emitting never fails the caller. Human readable
//! messages come from an [`EventMessages`] table built once at startup and shared
//! by reference.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gitspace_store::{GitspaceEntityType, GitspaceEventRecord, Store};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Kind of a gitspace domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitspaceEventType {
    /// Start was requested.
    GitspaceActionStart,
    /// Start finished and the IDE is reachable.
    GitspaceActionStartCompleted,
    /// Start failed.
    GitspaceActionStartFailed,
    /// Stop was requested.
    GitspaceActionStop,
    /// Stop finished.
    GitspaceActionStopCompleted,
    /// Stop failed.
    GitspaceActionStopFailed,
    /// Delete was requested.
    GitspaceActionDelete,
    /// Delete failed.
    GitspaceActionDeleteFailed,
    /// An instance was stuck in a busy state and was forced to error.
    GitspaceActionTimedOut,
    /// Provisioning was triggered.
    InfraProvisioningStart,
    /// Provisioning completed.
    InfraProvisioningCompleted,
    /// Provisioning failed.
    InfraProvisioningFailed,
    /// Stop was triggered.
    InfraStopStart,
    /// Stop completed.
    InfraStopCompleted,
    /// Stop failed.
    InfraStopFailed,
    /// Deprovisioning was triggered.
    InfraDeprovisioningStart,
    /// Deprovisioning completed.
    InfraDeprovisioningCompleted,
    /// Deprovisioning failed.
    InfraDeprovisioningFailed,
    /// Instance cleanup completed.
    InfraCleanupCompleted,
    /// Instance cleanup failed.
    InfraCleanupFailed,
}

impl GitspaceEventType {
    /// Every event type.
    pub const ALL: [Self; 20] = [
        Self::GitspaceActionStart,
        Self::GitspaceActionStartCompleted,
        Self::GitspaceActionStartFailed,
        Self::GitspaceActionStop,
        Self::GitspaceActionStopCompleted,
        Self::GitspaceActionStopFailed,
        Self::GitspaceActionDelete,
        Self::GitspaceActionDeleteFailed,
        Self::GitspaceActionTimedOut,
        Self::InfraProvisioningStart,
        Self::InfraProvisioningCompleted,
        Self::InfraProvisioningFailed,
        Self::InfraStopStart,
        Self::InfraStopCompleted,
        Self::InfraStopFailed,
        Self::InfraDeprovisioningStart,
        Self::InfraDeprovisioningCompleted,
        Self::InfraDeprovisioningFailed,
        Self::InfraCleanupCompleted,
        Self::InfraCleanupFailed,
    ];

    /// Stable string form, persisted with the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GitspaceActionStart => "gitspace_action_start",
            Self::GitspaceActionStartCompleted => "gitspace_action_start_completed",
            Self::GitspaceActionStartFailed => "gitspace_action_start_failed",
            Self::GitspaceActionStop => "gitspace_action_stop",
            Self::GitspaceActionStopCompleted => "gitspace_action_stop_completed",
            Self::GitspaceActionStopFailed => "gitspace_action_stop_failed",
            Self::GitspaceActionDelete => "gitspace_action_delete",
            Self::GitspaceActionDeleteFailed => "gitspace_action_delete_failed",
            Self::GitspaceActionTimedOut => "gitspace_action_timed_out",
            Self::InfraProvisioningStart => "infra_provisioning_start",
            Self::InfraProvisioningCompleted => "infra_provisioning_completed",
            Self::InfraProvisioningFailed => "infra_provisioning_failed",
            Self::InfraStopStart => "infra_stop_start",
            Self::InfraStopCompleted => "infra_stop_completed",
            Self::InfraStopFailed => "infra_stop_failed",
            Self::InfraDeprovisioningStart => "infra_deprovisioning_start",
            Self::InfraDeprovisioningCompleted => "infra_deprovisioning_completed",
            Self::InfraDeprovisioningFailed => "infra_deprovisioning_failed",
            Self::InfraCleanupCompleted => "infra_cleanup_completed",
            Self::InfraCleanupFailed => "infra_cleanup_failed",
        }
    }
}

impl fmt::Display for GitspaceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable lookup of human readable event messages.
#[derive(Debug)]
pub struct EventMessages {
    messages: HashMap<GitspaceEventType, &'static str>,
}

impl EventMessages {
    /// Build the table.
    #[must_use]
    pub fn new() -> Self {
        use GitspaceEventType as E;

        let messages = HashMap::from([
            (E::GitspaceActionStart, "Starting gitspace..."),
            (E::GitspaceActionStartCompleted, "Started gitspace"),
            (E::GitspaceActionStartFailed, "Starting gitspace failed"),
            (E::GitspaceActionStop, "Stopping gitspace..."),
            (E::GitspaceActionStopCompleted, "Stopped gitspace"),
            (E::GitspaceActionStopFailed, "Stopping gitspace failed"),
            (E::GitspaceActionDelete, "Deleting gitspace..."),
            (E::GitspaceActionDeleteFailed, "Deleting gitspace failed"),
            (E::GitspaceActionTimedOut, "Previous gitspace action timed out"),
            (E::InfraProvisioningStart, "Provisioning infrastructure..."),
            (E::InfraProvisioningCompleted, "Provisioning infrastructure completed"),
            (E::InfraProvisioningFailed, "Provisioning infrastructure failed"),
            (E::InfraStopStart, "Stopping infrastructure..."),
            (E::InfraStopCompleted, "Stopping infrastructure completed"),
            (E::InfraStopFailed, "Stopping infrastructure failed"),
            (E::InfraDeprovisioningStart, "Deprovisioning infrastructure..."),
            (E::InfraDeprovisioningCompleted, "Deprovisioning infrastructure completed"),
            (E::InfraDeprovisioningFailed, "Deprovisioning infrastructure failed"),
            (E::InfraCleanupCompleted, "Cleaning up infrastructure completed"),
            (E::InfraCleanupFailed, "Cleaning up infrastructure failed"),
        ]);
        Self { messages }
    }

    /// Message for an event type.
    #[must_use]
    pub fn message(&self, event: GitspaceEventType) -> &'static str {
        self.messages.get(&event).copied().unwrap_or("")
    }
}

impl Default for EventMessages {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload of an emitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitspaceEvent {
    /// Raw id of the entity the event refers to.
    pub entity_id: i64,
    /// Kind of entity.
    pub entity_type: GitspaceEntityType,
    /// Config identifier, used to list a gitspace's events.
    pub query_key: String,
    /// Event type.
    pub event: GitspaceEventType,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl GitspaceEvent {
    /// An event stamped now.
    #[must_use]
    pub fn now(
        entity_type: GitspaceEntityType,
        entity_id: i64,
        query_key: impl Into<String>,
        event: GitspaceEventType,
    ) -> Self {
        Self {
            entity_id,
            entity_type,
            query_key: query_key.into(),
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Publishes domain events.
pub trait EventEmitter: Send + Sync {
    /// Publish an event. Failures are logged, never returned.
    fn emit(&self, event: GitspaceEvent);
}

/// Emitter that logs and persists events through the store.
pub struct StoreEventEmitter<S: Store> {
    store: Arc<S>,
    messages: Arc<EventMessages>,
}

impl<S: Store> StoreEventEmitter<S> {
    /// Create an emitter over a store.
    pub fn new(store: Arc<S>, messages: Arc<EventMessages>) -> Self {
        Self { store, messages }
    }
}

impl<S: Store> EventEmitter for StoreEventEmitter<S> {
    fn emit(&self, event: GitspaceEvent) {
        info!(
            event = %event.event,
            entity_id = event.entity_id,
            query_key = %event.query_key,
            "{}",
            self.messages.message(event.event)
        );

        let mut record = GitspaceEventRecord {
            id: gitspace_core::GitspaceEventId::new(0),
            entity_id: event.entity_id,
            entity_type: event.entity_type,
            event: event.event.as_str().to_string(),
            query_key: event.query_key,
            timestamp: event.timestamp,
        };
        if let Err(e) = self.store.create_gitspace_event(&mut record) {
            error!(event = %event.event, error = %e, "Failed to persist gitspace event");
        }
    }
}
