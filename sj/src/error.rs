//! Error taxonomy for the orchestration core
//!
//! | Error | Raised by | Policy |
//! |-------|-----------|--------|
//! | [`ConfigError`] | topic descriptor builder | surfaced to the caller, never retried |
//! | [`LifecycleError`] | agent manager | fatal to the call, not the process |
//! | [`DispatchError`] | signal bus | aggregated after every listener ran |
//! | [`RebalanceAnomaly`] | rebalance tracer | reported to the monitor, not fatal |
//! | [`ShutdownTimeout`] | agent manager | reported; abort decision left to bootstrap |
//! | [`MonitorError`] | monitor collaborator | logged as degraded observability |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::agent::ManagerPhase;
use crate::rebalance::RebalancePhase;
use crate::signal::Signal;

/// Invalid topic descriptor input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("topics and pattern are mutually exclusive")]
    MutuallyExclusive,

    #[error("no destination: give topic names or a pattern, or set allow_empty")]
    NoDestination,

    #[error("invalid partitions: {0} (must be a positive integer)")]
    InvalidPartitions(u32),

    #[error("invalid replicas: {0} (must be at least 1)")]
    InvalidReplicas(u32),

    #[error("invalid retention: {0}s (must be a non-negative duration)")]
    InvalidRetention(f64),

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Illegal agent manager state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("agent '{name}' cannot be registered: manager is {phase}")]
    RegisterAfterStart { name: String, phase: ManagerPhase },

    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: ManagerPhase, to: ManagerPhase },
}

/// Which registry tier a listener was connected in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerScope {
    /// Connected with a sender filter matching the sender
    Local,
    /// Connected without a sender filter
    Global,
}

impl fmt::Display for ListenerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerScope::Local => write!(f, "local"),
            ListenerScope::Global => write!(f, "global"),
        }
    }
}

/// One listener that failed during a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub listener: String,
    pub scope: ListenerScope,
    pub message: String,
}

/// Aggregate of listener failures raised by one `send`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} listener(s) failed handling {signal}: {}", failures.len(), summarize(failures))]
pub struct DispatchError {
    pub signal: Signal,
    pub failures: Vec<ListenerFailure>,
}

impl DispatchError {
    /// Merge another dispatch's failures into this one
    pub fn merge(mut self, other: DispatchError) -> Self {
        self.failures.extend(other.failures);
        self
    }

    /// Names of the failed listeners in dispatch order
    pub fn listeners(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.listener.as_str()).collect()
    }
}

fn summarize(failures: &[ListenerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({}): {}", f.listener, f.scope, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Overlapping or out-of-order revoke/assign
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RebalanceAnomaly {
    #[error("partitions revoked while span {interrupted_span} was assigning; span interrupted")]
    OverlappingRebalance { interrupted_span: u64 },

    #[error("partitions assigned without a preceding revoke")]
    AssignWithoutRevoke,

    #[error("rebalance out of order: expected {expected}, tracer is {actual}")]
    OutOfOrder {
        expected: RebalancePhase,
        actual: RebalancePhase,
    },
}

/// An agent did not acknowledge a stop request within the grace period
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("agent '{agent}' did not stop within {grace:?}")]
pub struct ShutdownTimeout {
    pub agent: String,
    pub grace: Duration,
}

/// Failure reported by the monitor collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("monitor unavailable: {0}")]
    Unavailable(String),

    #[error("monitor rejected record: {0}")]
    Rejected(String),
}
