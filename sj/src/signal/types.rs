//! Signal vocabulary
//!
//! The lifecycle events any code may listen to:
//! - Configuration (before, after)
//! - Rebalance (partitions revoked, partitions assigned)
//! - Agent lifecycle (started, stopped)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{Assignment, SenderId};

/// A named lifecycle event channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    BeforeConfigured,
    AfterConfigured,
    PartitionsRevoked,
    PartitionsAssigned,
    AgentStarted,
    AgentStopped,
}

impl Signal {
    /// Every recognized signal
    pub const ALL: [Signal; 6] = [
        Signal::BeforeConfigured,
        Signal::AfterConfigured,
        Signal::PartitionsRevoked,
        Signal::PartitionsAssigned,
        Signal::AgentStarted,
        Signal::AgentStopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::BeforeConfigured => "before-configured",
            Signal::AfterConfigured => "after-configured",
            Signal::PartitionsRevoked => "partitions-revoked",
            Signal::PartitionsAssigned => "partitions-assigned",
            Signal::AgentStarted => "agent-started",
            Signal::AgentStopped => "agent-stopped",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data carried by a signal occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SignalPayload {
    /// Configuration phase boundary
    Configured,
    /// Partitions revoked or assigned
    Partitions { assignment: Assignment },
    /// An agent changed lifecycle state
    Agent { name: String },
}

/// One occurrence of a signal raised by one sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub signal: Signal,
    pub sender: SenderId,
    /// Caller-supplied id of the sending application
    pub app_id: String,
    pub payload: SignalPayload,
}

impl SignalEvent {
    pub fn new(signal: Signal, sender: SenderId, app_id: impl Into<String>, payload: SignalPayload) -> Self {
        Self {
            signal,
            sender,
            app_id: app_id.into(),
            payload,
        }
    }

    /// Partitions carried by a rebalance signal
    pub fn assignment(&self) -> Option<&Assignment> {
        match &self.payload {
            SignalPayload::Partitions { assignment } => Some(assignment),
            _ => None,
        }
    }

    /// Agent name carried by an agent lifecycle signal
    pub fn agent_name(&self) -> Option<&str> {
        match &self.payload {
            SignalPayload::Agent { name } => Some(name),
            _ => None,
        }
    }
}
