//! SignalEmitter - raise signals on behalf of one application

use std::sync::Arc;

use tracing::debug;

use super::bus::{Dispatched, SignalBus, send_both};
use super::types::{Signal, SignalEvent, SignalPayload};
use crate::domain::{Assignment, SenderId};
use crate::error::DispatchError;

/// Handle for components to raise signals without owning the buses
///
/// Bound to one application's instance bus and sender identity. Every send
/// goes to the instance bus first and then to the process-wide bus.
#[derive(Clone)]
pub struct SignalEmitter {
    local: Arc<SignalBus>,
    sender: SenderId,
    app_id: String,
}

impl SignalEmitter {
    pub fn new(local: Arc<SignalBus>, sender: SenderId, app_id: impl Into<String>) -> Self {
        let app_id = app_id.into();
        debug!(%app_id, %sender, "SignalEmitter::new: called");
        Self { local, sender, app_id }
    }

    pub fn sender(&self) -> SenderId {
        self.sender
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Raise a signal on the instance bus, then the global bus
    pub async fn send(&self, signal: Signal, payload: SignalPayload) -> Result<Dispatched, DispatchError> {
        let event = SignalEvent::new(signal, self.sender, self.app_id.clone(), payload);
        send_both(&self.local, SignalBus::global(), &event).await
    }

    // === Convenience methods ===

    pub async fn before_configured(&self) -> Result<Dispatched, DispatchError> {
        self.send(Signal::BeforeConfigured, SignalPayload::Configured).await
    }

    pub async fn after_configured(&self) -> Result<Dispatched, DispatchError> {
        self.send(Signal::AfterConfigured, SignalPayload::Configured).await
    }

    pub async fn partitions_revoked(&self, assignment: &Assignment) -> Result<Dispatched, DispatchError> {
        self.send(
            Signal::PartitionsRevoked,
            SignalPayload::Partitions {
                assignment: assignment.clone(),
            },
        )
        .await
    }

    pub async fn partitions_assigned(&self, assignment: &Assignment) -> Result<Dispatched, DispatchError> {
        self.send(
            Signal::PartitionsAssigned,
            SignalPayload::Partitions {
                assignment: assignment.clone(),
            },
        )
        .await
    }

    pub async fn agent_started(&self, name: &str) -> Result<Dispatched, DispatchError> {
        self.send(Signal::AgentStarted, SignalPayload::Agent { name: name.to_string() })
            .await
    }

    pub async fn agent_stopped(&self, name: &str) -> Result<Dispatched, DispatchError> {
        self.send(Signal::AgentStopped, SignalPayload::Agent { name: name.to_string() })
            .await
    }
}
