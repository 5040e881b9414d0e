//! Agents - long-running stream processors and their manager
//!
//! An [`Agent`] is registered with an [`AgentDef`], started by the
//! [`AgentManager`] as a tokio task, and observes stop requests and its
//! current partition ownership through its [`AgentContext`].

mod context;
mod manager;
mod types;

pub use context::AgentContext;
pub use manager::AgentManager;
pub use types::{
    Agent, AgentDef, AgentFailure, AgentHandle, AgentState, AgentTaskResult, AssignReport, ManagerPhase,
    RevokeReport, StartReport, StopReport,
};
