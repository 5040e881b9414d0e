//! AgentManager - registry and lifecycle of an application's agents
//!
//! The AgentManager is responsible for:
//! - Registering agent definitions (replaceable by name until start)
//! - Starting every agent concurrently and spawning its run task
//! - Cooperative shutdown bounded by a grace period and a hard timeout
//! - Routing partition revoke/assign to agent hooks
//!
//! ```text
//!   register ──► [Registering] ── start_all ──► [Running] ── stop_all ──► [Stopped]
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::context::AgentContext;
use super::types::{
    Agent, AgentDef, AgentFailure, AgentHandle, AgentState, AgentTaskResult, AssignReport, ManagerPhase,
    RevokeReport, StartReport, StopReport,
};
use crate::config::AgentsConfig;
use crate::domain::Assignment;
use crate::error::{DispatchError, LifecycleError, ShutdownTimeout};
use crate::rebalance::{AssignPermit, Sensors};
use crate::signal::{Dispatched, SignalEmitter};

struct Entry {
    def: AgentDef,
    state: AgentState,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<AgentTaskResult>>,
}

struct Registry {
    phase: ManagerPhase,
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
}

struct Prepared {
    index: usize,
    name: String,
    agent: Arc<dyn Agent>,
    ctx: AgentContext,
}

enum Shutdown {
    Acknowledged {
        index: usize,
        result: AgentTaskResult,
    },
    Stuck {
        index: usize,
        name: String,
        task: JoinHandle<AgentTaskResult>,
    },
}

/// Owns the agents of one application
pub struct AgentManager {
    app_id: String,
    emitter: SignalEmitter,
    sensors: Arc<Sensors>,
    owned: Arc<RwLock<Assignment>>,
    registry: Mutex<Registry>,
    config: RwLock<AgentsConfig>,
}

impl AgentManager {
    pub fn new(emitter: SignalEmitter, sensors: Arc<Sensors>) -> Self {
        let app_id = emitter.app_id().to_string();
        debug!(%app_id, "AgentManager::new: called");
        Self {
            app_id,
            emitter,
            sensors,
            owned: Arc::new(RwLock::new(Assignment::new())),
            registry: Mutex::new(Registry {
                phase: ManagerPhase::Registering,
                entries: Vec::new(),
                by_name: HashMap::new(),
            }),
            config: RwLock::new(AgentsConfig::default()),
        }
    }

    pub fn apply_config(&self, config: &AgentsConfig) {
        debug!(
            app_id = %self.app_id,
            grace_ms = config.shutdown_grace_ms,
            hard_ms = config.hard_timeout_ms,
            "AgentManager::apply_config: called"
        );
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config.clone();
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    // === Registration ===

    /// Register an agent, replacing an earlier definition with the same name
    ///
    /// Only allowed before `start_all`.
    pub fn register(&self, def: AgentDef) -> Result<AgentHandle, LifecycleError> {
        debug!(app_id = %self.app_id, agent = %def.name, "AgentManager::register: called");
        let mut registry = self.lock();
        if registry.phase != ManagerPhase::Registering {
            debug!(app_id = %self.app_id, agent = %def.name, phase = %registry.phase, "AgentManager::register: rejected");
            return Err(LifecycleError::RegisterAfterStart {
                name: def.name,
                phase: registry.phase,
            });
        }

        let name = def.name.clone();
        let index = match registry.by_name.get(&name).copied() {
            Some(index) => {
                debug!(app_id = %self.app_id, agent = %name, index, "AgentManager::register: replacing definition");
                if let Some(entry) = registry.entries.get_mut(index) {
                    entry.def = def;
                }
                index
            }
            None => {
                let index = registry.entries.len();
                registry.entries.push(Entry {
                    def,
                    state: AgentState::Registered,
                    stop_tx: None,
                    task: None,
                });
                registry.by_name.insert(name.clone(), index);
                index
            }
        };

        Ok(AgentHandle {
            index,
            name,
            app_id: self.app_id.clone(),
        })
    }

    /// Look up the definition a handle refers to
    pub fn resolve(&self, handle: &AgentHandle) -> Option<AgentDef> {
        if handle.app_id != self.app_id {
            return None;
        }
        let registry = self.lock();
        registry
            .entries
            .get(handle.index)
            .filter(|entry| entry.def.name == handle.name)
            .map(|entry| entry.def.clone())
    }

    pub fn handle(&self, name: &str) -> Option<AgentHandle> {
        let registry = self.lock();
        registry.by_name.get(name).map(|index| AgentHandle {
            index: *index,
            name: name.to_string(),
            app_id: self.app_id.clone(),
        })
    }

    // === Lifecycle ===

    /// Start every registered agent concurrently
    ///
    /// Returns once each agent's `on_start` has finished. Agents that fail
    /// to start are reported and do not affect the others.
    pub async fn start_all(&self) -> Result<StartReport, LifecycleError> {
        debug!(app_id = %self.app_id, "AgentManager::start_all: called");
        let prepared: Vec<Prepared> = {
            let mut registry = self.lock();
            if registry.phase != ManagerPhase::Registering {
                return Err(LifecycleError::InvalidTransition {
                    from: registry.phase,
                    to: ManagerPhase::Running,
                });
            }
            registry.phase = ManagerPhase::Running;

            registry
                .entries
                .iter_mut()
                .enumerate()
                .map(|(index, entry)| {
                    let (stop_tx, stop_rx) = watch::channel(false);
                    entry.stop_tx = Some(stop_tx);
                    entry.state = AgentState::Starting;
                    let handle = AgentHandle {
                        index,
                        name: entry.def.name.clone(),
                        app_id: self.app_id.clone(),
                    };
                    Prepared {
                        index,
                        name: entry.def.name.clone(),
                        agent: Arc::clone(&entry.def.agent),
                        ctx: AgentContext::new(
                            handle,
                            entry.def.topic.clone(),
                            stop_rx,
                            Arc::clone(&self.owned),
                            Arc::clone(&self.sensors),
                        ),
                    }
                })
                .collect()
        };

        info!(app_id = %self.app_id, count = prepared.len(), "Starting agents");
        // Each on_start runs in its own task so a panic stays with its agent
        let starts: Vec<JoinHandle<eyre::Result<()>>> = prepared
            .iter()
            .map(|p| {
                let agent = Arc::clone(&p.agent);
                let ctx = p.ctx.clone();
                tokio::spawn(async move { agent.on_start(&ctx).await })
            })
            .collect();
        let results = join_all(starts).await;

        let mut report = StartReport::default();
        {
            let mut registry = self.lock();
            for (p, result) in prepared.into_iter().zip(results) {
                let Some(entry) = registry.entries.get_mut(p.index) else {
                    continue;
                };
                let started = match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("{:#}", e)),
                    Err(e) => Err(join_failure(&e)),
                };
                match started {
                    Ok(()) => {
                        debug!(app_id = %self.app_id, agent = %p.name, "AgentManager::start_all: spawning run task");
                        entry.task = Some(tokio::spawn(run_agent(p.name.clone(), p.agent, p.ctx)));
                        entry.state = AgentState::Running;
                        report.running.push(p.name);
                    }
                    Err(reason) => {
                        warn!(app_id = %self.app_id, agent = %p.name, %reason, "Agent failed to start");
                        entry.state = AgentState::Failed;
                        entry.stop_tx = None;
                        report.failed.push(AgentFailure { agent: p.name, reason });
                    }
                }
            }
        }

        for name in &report.running {
            self.log_dispatch(self.emitter.agent_started(name).await, name);
        }

        info!(
            app_id = %self.app_id,
            running = report.running.len(),
            failed = report.failed.len(),
            "Agents started"
        );
        Ok(report)
    }

    /// Request every running agent to stop and wait for them
    ///
    /// Agents still running after the grace period are reported as
    /// [`ShutdownTimeout`], aborted, and awaited until the hard timeout.
    /// Aborted agents end in `Failed` and are not signalled as stopped.
    pub async fn stop_all(&self) -> Result<StopReport, LifecycleError> {
        debug!(app_id = %self.app_id, "AgentManager::stop_all: called");
        let (grace, hard) = {
            let config = self.config.read().unwrap_or_else(|e| e.into_inner());
            (config.shutdown_grace(), config.hard_timeout())
        };

        let tasks: Vec<(usize, String, JoinHandle<AgentTaskResult>)> = {
            let mut registry = self.lock();
            if registry.phase != ManagerPhase::Running {
                return Err(LifecycleError::InvalidTransition {
                    from: registry.phase,
                    to: ManagerPhase::Stopped,
                });
            }
            registry.phase = ManagerPhase::Stopped;

            registry
                .entries
                .iter_mut()
                .enumerate()
                .filter_map(|(index, entry)| {
                    if let Some(stop_tx) = entry.stop_tx.take() {
                        let _ = stop_tx.send(true);
                    }
                    let task = entry.task.take()?;
                    entry.state = AgentState::Stopping;
                    Some((index, entry.def.name.clone(), task))
                })
                .collect()
        };

        info!(app_id = %self.app_id, count = tasks.len(), ?grace, "Stopping agents");
        let outcomes = join_all(tasks.into_iter().map(|(index, name, mut task)| async move {
            match tokio::time::timeout(grace, &mut task).await {
                Ok(joined) => Shutdown::Acknowledged {
                    index,
                    result: task_result(&name, joined),
                },
                Err(_) => Shutdown::Stuck { index, name, task },
            }
        }))
        .await;

        let mut report = StopReport::default();
        let mut finished: Vec<(usize, String, AgentState)> = Vec::new();
        let mut stuck = Vec::new();

        for outcome in outcomes {
            match outcome {
                Shutdown::Acknowledged { index, result } => {
                    debug!(app_id = %self.app_id, agent = %result.name(), ?result, "AgentManager::stop_all: agent stopped");
                    report.stopped.push(result.name().to_string());
                    finished.push((index, result.name().to_string(), result.state()));
                }
                Shutdown::Stuck { index, name, task } => {
                    let timeout = ShutdownTimeout {
                        agent: name.clone(),
                        grace,
                    };
                    warn!(app_id = %self.app_id, %timeout, "Agent did not stop in time; aborting");
                    task.abort();
                    report.timeouts.push(timeout);
                    stuck.push((index, name, task));
                }
            }
        }

        if !stuck.is_empty() {
            let remaining = hard.saturating_sub(grace);
            debug!(app_id = %self.app_id, count = stuck.len(), ?remaining, "AgentManager::stop_all: waiting for aborted agents");
            let aborted = join_all(stuck.into_iter().map(|(index, name, task)| async move {
                let done = tokio::time::timeout(remaining, task).await.is_ok();
                (index, name, done)
            }))
            .await;

            for (index, name, done) in aborted {
                self.set_state(index, AgentState::Failed);
                if !done {
                    error!(app_id = %self.app_id, agent = %name, ?hard, "Agent still running after abort");
                    report.unresolved.push(name);
                }
            }
        }

        for (index, _, state) in &finished {
            self.set_state(*index, *state);
        }
        for (_, name, _) in &finished {
            self.log_dispatch(self.emitter.agent_stopped(name).await, name);
        }

        info!(
            app_id = %self.app_id,
            stopped = report.stopped.len(),
            timeouts = report.timeouts.len(),
            "Agents stopped"
        );
        Ok(report)
    }

    /// Collect run tasks that ended on their own
    pub async fn reap_finished(&self) -> Vec<AgentTaskResult> {
        let finished: Vec<(usize, String, JoinHandle<AgentTaskResult>)> = {
            let mut registry = self.lock();
            registry
                .entries
                .iter_mut()
                .enumerate()
                .filter_map(|(index, entry)| {
                    if !entry.task.as_ref().is_some_and(|t| t.is_finished()) {
                        return None;
                    }
                    let task = entry.task.take()?;
                    Some((index, entry.def.name.clone(), task))
                })
                .collect()
        };

        let mut results = Vec::with_capacity(finished.len());
        for (index, name, task) in finished {
            let result = task_result(&name, task.await);
            debug!(app_id = %self.app_id, agent = %name, ?result, "AgentManager::reap_finished: reaped");
            self.set_state(index, result.state());
            self.log_dispatch(self.emitter.agent_stopped(&name).await, &name);
            results.push(result);
        }
        results
    }

    // === Rebalance ===

    /// Take `revoked` away from every agent
    ///
    /// Ownership is dropped before any hook runs. Hooks then run one agent
    /// at a time; failures are collected and do not stop later hooks.
    pub async fn on_partitions_revoked(&self, revoked: &Assignment) -> RevokeReport {
        debug!(app_id = %self.app_id, partitions = %revoked, "AgentManager::on_partitions_revoked: called");
        self.owned.write().unwrap_or_else(|e| e.into_inner()).remove_all(revoked);

        let mut report = RevokeReport {
            revoked: revoked.clone(),
            ..Default::default()
        };
        for (name, agent, relevant) in self.hook_targets(revoked) {
            debug!(app_id = %self.app_id, agent = %name, partitions = %relevant, "AgentManager::on_partitions_revoked: invoking hook");
            match agent.on_partitions_revoked(&relevant).await {
                Ok(()) => report.paused.push(name),
                Err(e) => {
                    warn!(app_id = %self.app_id, agent = %name, error = %e, "Agent revoke hook failed");
                    report.failures.push(AgentFailure {
                        agent: name,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }
        report
    }

    /// Hand `assigned` to the agents
    ///
    /// The permit ties the call to a span whose revoke phase has closed.
    /// Hooks run first; ownership is granted once they are done.
    pub async fn on_partitions_assigned(&self, assigned: &Assignment, permit: &AssignPermit) -> AssignReport {
        debug!(
            app_id = %self.app_id,
            span_id = permit.span_id(),
            partitions = %assigned,
            "AgentManager::on_partitions_assigned: called"
        );

        let mut report = AssignReport {
            assigned: assigned.clone(),
            ..Default::default()
        };
        for (name, agent, relevant) in self.hook_targets(assigned) {
            debug!(app_id = %self.app_id, agent = %name, partitions = %relevant, "AgentManager::on_partitions_assigned: invoking hook");
            match agent.on_partitions_assigned(&relevant).await {
                Ok(()) => report.resumed.push(name),
                Err(e) => {
                    warn!(app_id = %self.app_id, agent = %name, error = %e, "Agent assign hook failed");
                    report.failures.push(AgentFailure {
                        agent: name,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        self.owned.write().unwrap_or_else(|e| e.into_inner()).extend_from(assigned);
        report
    }

    /// Running agents with a non-empty share of `assignment`, in registration order
    fn hook_targets(&self, assignment: &Assignment) -> Vec<(String, Arc<dyn Agent>, Assignment)> {
        let registry = self.lock();
        registry
            .entries
            .iter()
            .filter(|entry| entry.state == AgentState::Running)
            .filter_map(|entry| {
                let relevant = entry.def.relevant(assignment);
                if relevant.is_empty() {
                    debug!(app_id = %self.app_id, agent = %entry.def.name, "hook_targets: no relevant partitions, skipping");
                    return None;
                }
                Some((entry.def.name.clone(), Arc::clone(&entry.def.agent), relevant))
            })
            .collect()
    }

    // === Observation ===

    pub fn phase(&self) -> ManagerPhase {
        self.lock().phase
    }

    pub fn state(&self, name: &str) -> Option<AgentState> {
        let registry = self.lock();
        registry
            .by_name
            .get(name)
            .and_then(|index| registry.entries.get(*index))
            .map(|entry| entry.state)
    }

    /// Every agent with its state, in registration order
    pub fn agents(&self) -> Vec<(String, AgentState)> {
        let registry = self.lock();
        registry
            .entries
            .iter()
            .map(|entry| (entry.def.name.clone(), entry.state))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Partitions the application currently owns
    pub fn owned_partitions(&self) -> Assignment {
        self.owned.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, index: usize, state: AgentState) {
        if let Some(entry) = self.lock().entries.get_mut(index) {
            entry.state = state;
        }
    }

    fn log_dispatch(&self, result: Result<Dispatched, DispatchError>, agent: &str) {
        if let Err(e) = result {
            warn!(app_id = %self.app_id, agent, error = %e, "Agent lifecycle listener failed");
        }
    }
}

async fn run_agent(name: String, agent: Arc<dyn Agent>, ctx: AgentContext) -> AgentTaskResult {
    debug!(agent = %name, "run_agent: called");
    match agent.run(ctx.clone()).await {
        Ok(()) if ctx.is_stop_requested() => AgentTaskResult::Stopped { name },
        Ok(()) => {
            info!(agent = %name, "Agent finished");
            AgentTaskResult::Complete { name }
        }
        Err(e) => {
            error!(agent = %name, error = %e, "Agent failed");
            AgentTaskResult::Failed {
                name,
                reason: format!("{:#}", e),
            }
        }
    }
}

fn task_result(name: &str, joined: Result<AgentTaskResult, JoinError>) -> AgentTaskResult {
    match joined {
        Ok(result) => result,
        Err(e) => AgentTaskResult::Failed {
            name: name.to_string(),
            reason: join_failure(&e),
        },
    }
}

fn join_failure(e: &JoinError) -> String {
    if e.is_panic() {
        "agent panicked".to_string()
    } else {
        "agent task cancelled".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use eyre::{Result, eyre};

    use crate::domain::{SenderId, TopicPartition};
    use crate::rebalance::RebalanceTracer;
    use crate::signal::{Signal, SignalBus, SignalEvent, listener_fn};
    use crate::topic::TopicDescriptor;

    fn manager() -> (AgentManager, Arc<SignalBus>, SenderId) {
        let bus = Arc::new(SignalBus::new("agent-test"));
        let sender = SenderId::new();
        let emitter = SignalEmitter::new(Arc::clone(&bus), sender, "agent-test");
        let manager = AgentManager::new(emitter, Arc::new(Sensors::new()));
        manager.apply_config(&AgentsConfig {
            shutdown_grace_ms: 100,
            hard_timeout_ms: 1_000,
        });
        (manager, bus, sender)
    }

    fn parts(topic: &str, ids: &[u32]) -> Assignment {
        ids.iter().map(|p| TopicPartition::new(topic, *p)).collect()
    }

    /// Runs until asked to stop; records hook calls
    #[derive(Default)]
    struct Cooperative {
        ctx: Mutex<Option<AgentContext>>,
        revoked: Mutex<Vec<Assignment>>,
        assigned: Mutex<Vec<Assignment>>,
        owned_during_revoke: AtomicBool,
    }

    #[async_trait]
    impl Agent for Cooperative {
        async fn on_start(&self, ctx: &AgentContext) -> Result<()> {
            *self.ctx.lock().unwrap() = Some(ctx.clone());
            Ok(())
        }

        async fn run(&self, ctx: AgentContext) -> Result<()> {
            ctx.stopped().await;
            Ok(())
        }

        async fn on_partitions_revoked(&self, revoked: &Assignment) -> Result<()> {
            let ctx = self.ctx.lock().unwrap().clone();
            if let Some(ctx) = ctx
                && revoked.iter().any(|tp| ctx.owns(tp))
            {
                self.owned_during_revoke.store(true, Ordering::SeqCst);
            }
            self.revoked.lock().unwrap().push(revoked.clone());
            Ok(())
        }

        async fn on_partitions_assigned(&self, assigned: &Assignment) -> Result<()> {
            self.assigned.lock().unwrap().push(assigned.clone());
            Ok(())
        }
    }

    struct FailsToStart;

    #[async_trait]
    impl Agent for FailsToStart {
        async fn on_start(&self, _ctx: &AgentContext) -> Result<()> {
            Err(eyre!("no broker connection"))
        }

        async fn run(&self, _ctx: AgentContext) -> Result<()> {
            Ok(())
        }
    }

    /// Ignores stop requests
    struct Stuck;

    #[async_trait]
    impl Agent for Stuck {
        async fn run(&self, _ctx: AgentContext) -> Result<()> {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    }

    struct FailingHooks;

    #[async_trait]
    impl Agent for FailingHooks {
        async fn run(&self, ctx: AgentContext) -> Result<()> {
            ctx.stopped().await;
            Ok(())
        }

        async fn on_partitions_revoked(&self, _revoked: &Assignment) -> Result<()> {
            Err(eyre!("commit failed"))
        }
    }

    struct PanicsOnStart;

    #[async_trait]
    impl Agent for PanicsOnStart {
        async fn on_start(&self, _ctx: &AgentContext) -> Result<()> {
            panic!("state store corrupted");
        }

        async fn run(&self, _ctx: AgentContext) -> Result<()> {
            Ok(())
        }
    }

    struct Crashes;

    #[async_trait]
    impl Agent for Crashes {
        async fn run(&self, _ctx: AgentContext) -> Result<()> {
            Err(eyre!("poison message"))
        }
    }

    #[test]
    fn test_register_replaces_by_name() {
        let (manager, _, _) = manager();
        let first = manager.register(AgentDef::new("counter", Arc::new(Stuck))).unwrap();
        let second = manager
            .register(AgentDef::new("counter", Arc::new(Cooperative::default())))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.state("counter"), Some(AgentState::Registered));
        assert_eq!(manager.resolve(&first).map(|d| d.name), Some("counter".to_string()));
    }

    #[tokio::test]
    async fn test_register_after_start_fails() {
        let (manager, _, _) = manager();
        manager.start_all().await.unwrap();

        let err = manager
            .register(AgentDef::new("late", Arc::new(Cooperative::default())))
            .unwrap_err();
        assert_eq!(
            err,
            LifecycleError::RegisterAfterStart {
                name: "late".into(),
                phase: ManagerPhase::Running
            }
        );
        manager.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_all_partial_failure() {
        let (manager, _, _) = manager();
        manager.register(AgentDef::new("x", Arc::new(Cooperative::default()))).unwrap();
        manager.register(AgentDef::new("y", Arc::new(FailsToStart))).unwrap();

        let report = manager.start_all().await.unwrap();
        assert_eq!(report.running, vec!["x"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].agent, "y");
        assert!(report.failed[0].reason.contains("no broker"));

        tokio::task::yield_now().await;
        assert_eq!(manager.state("x"), Some(AgentState::Running));
        assert_eq!(manager.state("y"), Some(AgentState::Failed));
        assert!(manager.reap_finished().await.is_empty());

        manager.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_panic_in_on_start_is_isolated() {
        let (manager, _, _) = manager();
        manager.register(AgentDef::new("good", Arc::new(Cooperative::default()))).unwrap();
        manager.register(AgentDef::new("bad", Arc::new(PanicsOnStart))).unwrap();

        let report = manager.start_all().await.unwrap();
        assert_eq!(report.running, vec!["good"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].agent, "bad");
        assert_eq!(report.failed[0].reason, "agent panicked");
        assert_eq!(manager.state("good"), Some(AgentState::Running));
        assert_eq!(manager.state("bad"), Some(AgentState::Failed));

        let report = manager.stop_all().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.stopped, vec!["good"]);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let (manager, _, _) = manager();
        manager.start_all().await.unwrap();
        let err = manager.start_all().await.unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidTransition {
                from: ManagerPhase::Running,
                to: ManagerPhase::Running
            }
        );
    }

    #[tokio::test]
    async fn test_stop_before_start_rejected() {
        let (manager, _, _) = manager();
        assert!(matches!(
            manager.stop_all().await,
            Err(LifecycleError::InvalidTransition {
                from: ManagerPhase::Registering,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_stop_all_clean() {
        let (manager, _, _) = manager();
        manager.register(AgentDef::new("a", Arc::new(Cooperative::default()))).unwrap();
        manager.register(AgentDef::new("b", Arc::new(Cooperative::default()))).unwrap();
        manager.start_all().await.unwrap();

        let report = manager.stop_all().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.stopped.len(), 2);
        assert_eq!(manager.state("a"), Some(AgentState::Stopped));
        assert_eq!(manager.state("b"), Some(AgentState::Stopped));
        assert_eq!(manager.phase(), ManagerPhase::Stopped);
    }

    #[tokio::test]
    async fn test_stop_all_reports_stuck_agent() {
        let (manager, bus, sender) = manager();
        manager.register(AgentDef::new("good", Arc::new(Cooperative::default()))).unwrap();
        manager.register(AgentDef::new("stuck", Arc::new(Stuck))).unwrap();
        manager.start_all().await.unwrap();

        let signalled = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&signalled);
        bus.connect(
            Signal::AgentStopped,
            listener_fn("stopped", move |e: SignalEvent| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(e.agent_name().unwrap_or_default().to_string());
                    Ok(())
                }
            }),
            Some(sender),
        );

        let report = manager.stop_all().await.unwrap();
        assert_eq!(report.stopped, vec!["good"]);
        assert_eq!(report.timeouts.len(), 1);
        assert_eq!(report.timeouts[0].agent, "stuck");
        assert_eq!(report.timeouts[0].grace, Duration::from_millis(100));
        assert!(report.unresolved.is_empty());
        assert_eq!(manager.state("good"), Some(AgentState::Stopped));
        // Aborted, not stopped: the timeout stays visible in the state
        assert_eq!(manager.state("stuck"), Some(AgentState::Failed));
        assert_eq!(signalled.lock().unwrap().clone(), vec!["good"]);
    }

    #[tokio::test]
    async fn test_revoke_drops_ownership_before_hooks() {
        let (manager, _, _) = manager();
        let agent = Arc::new(Cooperative::default());
        manager.register(AgentDef::new("a", agent.clone())).unwrap();
        manager.start_all().await.unwrap();

        let tracer = RebalanceTracer::new("agent-test", Arc::new(Sensors::new()));
        let (permit, _) = tracer.open_for_assign();
        manager.on_partitions_assigned(&parts("t", &[0, 1]), &permit).await;
        assert_eq!(manager.owned_partitions().len(), 2);

        let report = manager.on_partitions_revoked(&parts("t", &[0])).await;
        assert_eq!(report.paused, vec!["a"]);
        assert!(!agent.owned_during_revoke.load(Ordering::SeqCst));
        assert_eq!(manager.owned_partitions(), parts("t", &[1]));

        manager.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_hooks_filtered_by_topic_and_isolated() {
        let (manager, _, _) = manager();
        let orders_topic = TopicDescriptor::builder().topic("orders").build().unwrap();
        let orders = Arc::new(Cooperative::default());
        let payments = Arc::new(Cooperative::default());
        let payments_topic = TopicDescriptor::builder().topic("payments").build().unwrap();

        manager.register(AgentDef::new("failing", Arc::new(FailingHooks))).unwrap();
        manager
            .register(AgentDef::new("orders", orders.clone()).with_topic(orders_topic))
            .unwrap();
        manager
            .register(AgentDef::new("payments", payments.clone()).with_topic(payments_topic))
            .unwrap();
        manager.start_all().await.unwrap();

        let report = manager.on_partitions_revoked(&parts("orders", &[0, 1])).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].agent, "failing");
        assert_eq!(report.paused, vec!["orders"]);
        assert_eq!(orders.revoked.lock().unwrap().len(), 1);
        assert!(payments.revoked.lock().unwrap().is_empty());

        manager.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_assign_with_permit() {
        let (manager, _, _) = manager();
        let agent = Arc::new(Cooperative::default());
        manager.register(AgentDef::new("a", agent.clone())).unwrap();
        manager.start_all().await.unwrap();

        let tracer = RebalanceTracer::new("agent-test", Arc::new(Sensors::new()));
        tracer.begin_revoke(&Assignment::new());
        tracer.revoke_completed(0).unwrap();
        let permit = tracer.assign_permit().unwrap();

        let report = manager.on_partitions_assigned(&parts("t", &[3]), &permit).await;
        assert_eq!(report.resumed, vec!["a"]);
        assert_eq!(agent.assigned.lock().unwrap().clone(), vec![parts("t", &[3])]);
        assert!(manager.owned_partitions().contains(&TopicPartition::new("t", 3)));

        manager.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_signals() {
        let (manager, bus, sender) = manager();
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        for signal in [Signal::AgentStarted, Signal::AgentStopped] {
            let seen = Arc::clone(&seen);
            bus.connect(
                signal,
                listener_fn("record", move |e: SignalEvent| {
                    let seen = Arc::clone(&seen);
                    async move {
                        let name = e.agent_name().unwrap_or_default();
                        seen.lock().unwrap().push(format!("{}:{}", e.signal, name));
                        Ok(())
                    }
                }),
                Some(sender),
            );
        }

        manager.register(AgentDef::new("a", Arc::new(Cooperative::default()))).unwrap();
        manager.start_all().await.unwrap();
        manager.stop_all().await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].ends_with(":a"));
        assert_eq!(seen[0], format!("{}:a", Signal::AgentStarted));
        assert_eq!(seen[1], format!("{}:a", Signal::AgentStopped));
    }

    #[tokio::test]
    async fn test_reap_failed_agent() {
        let (manager, _, _) = manager();
        manager.register(AgentDef::new("crashes", Arc::new(Crashes))).unwrap();
        manager.start_all().await.unwrap();

        let mut reaped = Vec::new();
        for _ in 0..50 {
            reaped = manager.reap_finished().await;
            if !reaped.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(reaped.len(), 1);
        assert!(matches!(&reaped[0], AgentTaskResult::Failed { reason, .. } if reason.contains("poison")));
        assert_eq!(manager.state("crashes"), Some(AgentState::Failed));

        // Nothing left to stop
        let report = manager.stop_all().await.unwrap();
        assert!(report.stopped.is_empty());
        assert_eq!(manager.state("crashes"), Some(AgentState::Failed));
    }
}
