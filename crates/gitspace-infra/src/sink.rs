//! Completion channel between providers and the orchestrator.
//!
//! Providers finish their work asynchronously and report the resulting
//! [`Infrastructure`](crate::Infrastructure) through an [`InfraEventSink`]. The
//! orchestrator drains the receiving end and persists the outcome.

use tokio::sync::mpsc;
use tracing::warn;

use crate::types::InfraEventReport;

/// Receives completion reports from providers.
///
/// Emission is fire-and-forget: a sink never fails the provider operation.
pub trait InfraEventSink: Send + Sync {
    /// Publish a completion report.
    fn emit(&self, report: InfraEventReport);
}

/// An [`InfraEventSink`] backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<InfraEventReport>,
}

impl ChannelSink {
    /// Create a sink and the receiver the orchestrator drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<InfraEventReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl InfraEventSink for ChannelSink {
    fn emit(&self, report: InfraEventReport) {
        let event = report.event;
        let instance_id = report.infra.gitspace_instance_id;
        if self.tx.send(report).is_err() {
            warn!(
                event = %event,
                gitspace_instance_id = %instance_id,
                "Infra event receiver dropped, completion report lost"
            );
        }
    }
}
