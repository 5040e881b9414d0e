//! Agent trait, definitions and lifecycle report types

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use serde::{Deserialize, Serialize};

use super::context::AgentContext;
use crate::domain::Assignment;
use crate::error::ShutdownTimeout;
use crate::topic::TopicDescriptor;

/// Lifecycle phase of the manager as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerPhase {
    /// Accepting registrations; nothing started yet
    Registering,
    /// `start_all` has been called
    Running,
    /// `stop_all` has been called
    Stopped,
}

impl fmt::Display for ManagerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerPhase::Registering => write!(f, "registering"),
            ManagerPhase::Running => write!(f, "running"),
            ManagerPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lifecycle state of one agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Registered,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Stopped | AgentState::Failed)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Registered => write!(f, "registered"),
            AgentState::Starting => write!(f, "starting"),
            AgentState::Running => write!(f, "running"),
            AgentState::Stopping => write!(f, "stopping"),
            AgentState::Stopped => write!(f, "stopped"),
            AgentState::Failed => write!(f, "failed"),
        }
    }
}

/// A long-running stream processor
///
/// `run` is spawned once `on_start` succeeds and should return when
/// [`AgentContext::stopped`] resolves. Rebalance hooks are called one agent
/// at a time and only with partitions of the agent's topic.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn on_start(&self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }

    async fn run(&self, ctx: AgentContext) -> Result<()>;

    async fn on_partitions_revoked(&self, _revoked: &Assignment) -> Result<()> {
        Ok(())
    }

    async fn on_partitions_assigned(&self, _assigned: &Assignment) -> Result<()> {
        Ok(())
    }
}

/// Registration record for an agent
#[derive(Clone)]
pub struct AgentDef {
    pub name: String,
    pub agent: Arc<dyn Agent>,
    /// When set, rebalance hooks only see partitions of matching topics
    pub topic: Option<TopicDescriptor>,
}

impl AgentDef {
    pub fn new(name: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self {
            name: name.into(),
            agent,
            topic: None,
        }
    }

    pub fn with_topic(mut self, topic: TopicDescriptor) -> Self {
        self.topic = Some(topic);
        self
    }

    /// The part of `assignment` this agent consumes
    pub fn relevant(&self, assignment: &Assignment) -> Assignment {
        match &self.topic {
            Some(topic) => assignment.filter_topics(|t| topic.matches(t)),
            None => assignment.clone(),
        }
    }
}

impl fmt::Debug for AgentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentDef")
            .field("name", &self.name)
            .field("topic", &self.topic.as_ref().map(|t| t.to_string()))
            .finish_non_exhaustive()
    }
}

/// Non-owning reference to a registered agent
///
/// Holds the registry slot and the owning application's id; resolve it
/// through the manager to look the agent up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentHandle {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) app_id: String,
}

impl AgentHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }
}

/// Result of an agent's run task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentTaskResult {
    /// `run` returned on its own
    Complete { name: String },
    /// `run` returned after a stop request
    Stopped { name: String },
    /// `run` returned an error or panicked
    Failed { name: String, reason: String },
}

impl AgentTaskResult {
    pub fn name(&self) -> &str {
        match self {
            AgentTaskResult::Complete { name }
            | AgentTaskResult::Stopped { name }
            | AgentTaskResult::Failed { name, .. } => name,
        }
    }

    pub(crate) fn state(&self) -> AgentState {
        match self {
            AgentTaskResult::Complete { .. } | AgentTaskResult::Stopped { .. } => AgentState::Stopped,
            AgentTaskResult::Failed { .. } => AgentState::Failed,
        }
    }
}

/// An agent hook that returned an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFailure {
    pub agent: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    pub running: Vec<String>,
    pub failed: Vec<AgentFailure>,
}

impl StartReport {
    pub fn all_running(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Agents that acknowledged the stop request within the grace period
    pub stopped: Vec<String>,
    /// Agents aborted after the grace period
    pub timeouts: Vec<ShutdownTimeout>,
    /// Stuck agents that had not finished even after abort and the hard timeout
    pub unresolved: Vec<String>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.timeouts.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevokeReport {
    pub revoked: Assignment,
    /// Agents whose revoke hook ran successfully
    pub paused: Vec<String>,
    pub failures: Vec<AgentFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignReport {
    pub assigned: Assignment,
    /// Agents whose assign hook ran successfully
    pub resumed: Vec<String>,
    pub failures: Vec<AgentFailure>,
}
