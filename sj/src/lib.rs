//! streamjobs - orchestration core for partitioned stream-processing agents
//!
//! An [`Application`] hosts agents that consume partitioned topics. The
//! broker decides which partitions the application owns; when ownership
//! changes, the application pauses, reassigns and resumes its agents while
//! tracing each rebalance as a span.
//!
//! # Modules
//!
//! - [`app`] - the Application root, configuration lifecycle and bootstrap
//! - [`agent`] - the Agent trait and AgentManager
//! - [`signal`] - lifecycle signals with per-instance and global listeners
//! - [`rebalance`] - rebalance state machine, spans and sensors
//! - [`topic`] - topic descriptors and creation requests
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface of the `sj` binary

pub mod agent;
pub mod app;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod rebalance;
pub mod signal;
pub mod topic;

// Re-export commonly used types
pub use agent::{Agent, AgentContext, AgentDef, AgentHandle, AgentManager, AgentState};
pub use app::{Application, ApplicationBuilder, AssignOutcome, Bootstrap, RevokeOutcome, WorkerBootstrap};
pub use config::Config;
pub use domain::{Assignment, SenderId, TopicPartition};
pub use error::{ConfigError, DispatchError, LifecycleError, MonitorError, RebalanceAnomaly, ShutdownTimeout};
pub use rebalance::{Monitor, RebalancePhase, RebalanceSpan, RebalanceTracer, Sensors, SpanBackend};
pub use signal::{Listener, Signal, SignalBus, SignalEvent, listener_fn};
pub use topic::{TopicBuilder, TopicDescriptor};
