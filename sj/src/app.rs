//! Application - the orchestration root
//!
//! One Application owns one instance signal bus, one agent manager and one
//! rebalance tracer. Nothing is shared between instances except the
//! process-wide global bus, which only sees listeners connected through
//! [`Application::connect_global`].
//!
//! ```text
//!   broker collaborator
//!        │ revoked(A)                         │ assigned(B)
//!        ▼                                    ▼
//!   tracer.begin_revoke                 tracer.assign_permit
//!   agents.on_partitions_revoked        agents.on_partitions_assigned
//!   signal PartitionsRevoked            signal PartitionsAssigned
//!   tracer.revoke_completed ──────────► tracer.finish_assign
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use crate::agent::{AgentDef, AgentHandle, AgentManager, AssignReport, ManagerPhase, RevokeReport, StartReport, StopReport};
use crate::config::{Config, TopicsConfig};
use crate::domain::{Assignment, SenderId};
use crate::error::{DispatchError, LifecycleError, RebalanceAnomaly};
use crate::rebalance::{LogMonitor, Monitor, RebalanceSpan, RebalanceTracer, Sensors, SpanBackend};
use crate::signal::{Connection, Listener, Signal, SignalBus, SignalEmitter};
use crate::topic::{TopicBuilder, TopicCreation, TopicDescriptor};

/// Hook run by [`Application::discover`] to register agents
pub type DiscoverHook = Arc<dyn Fn(&Application) -> Result<()> + Send + Sync>;

/// The process that takes over once the application is initialized
///
/// Exit codes and process exit belong to the bootstrap, not the core.
#[async_trait]
pub trait Bootstrap: Send + Sync {
    async fn run(&self, app: &Application) -> Result<()>;
}

/// Starts every agent, waits for Ctrl-C, then shuts down
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerBootstrap;

#[async_trait]
impl Bootstrap for WorkerBootstrap {
    async fn run(&self, app: &Application) -> Result<()> {
        debug!(app_id = %app.id(), "WorkerBootstrap::run: called");
        let report = app.start().await?;
        for failure in &report.failed {
            warn!(app_id = %app.id(), agent = %failure.agent, reason = %failure.reason, "Agent not running");
        }
        info!(app_id = %app.id(), running = report.running.len(), "Worker running; press Ctrl-C to stop");

        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        info!(app_id = %app.id(), "Shutdown requested");

        if let Some(report) = app.shutdown().await? {
            for timeout in &report.timeouts {
                warn!(app_id = %app.id(), %timeout, "Shutdown timeout");
            }
        }
        Ok(())
    }
}

/// What happened while handling a revoke
#[derive(Debug, Clone)]
pub struct RevokeOutcome {
    pub span_id: u64,
    pub report: RevokeReport,
    pub anomalies: Vec<RebalanceAnomaly>,
    pub dispatch_error: Option<DispatchError>,
}

/// What happened while handling an assign
#[derive(Debug, Clone)]
pub struct AssignOutcome {
    /// The closed span, when the assign closed one cleanly
    pub span: Option<RebalanceSpan>,
    pub report: AssignReport,
    pub anomalies: Vec<RebalanceAnomaly>,
    pub dispatch_error: Option<DispatchError>,
}

/// Builder for [`Application`]
pub struct ApplicationBuilder {
    id: String,
    config: Option<Config>,
    config_path: Option<PathBuf>,
    monitor: Option<Arc<dyn Monitor>>,
    span_backend: Option<Arc<dyn SpanBackend>>,
}

impl ApplicationBuilder {
    /// Use this configuration instead of loading one
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from this file
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn span_backend(mut self, backend: Arc<dyn SpanBackend>) -> Self {
        self.span_backend = Some(backend);
        self
    }

    pub fn build(self) -> Application {
        let sender = SenderId::new();
        debug!(app_id = %self.id, %sender, "ApplicationBuilder::build: called");

        let signals = Arc::new(SignalBus::new(format!("app:{}", self.id)));
        let emitter = SignalEmitter::new(Arc::clone(&signals), sender, self.id.clone());
        let sensors = Arc::new(Sensors::new());
        let agents = AgentManager::new(emitter.clone(), Arc::clone(&sensors));

        let monitor = self.monitor.unwrap_or_else(|| Arc::new(LogMonitor));
        let mut tracer = RebalanceTracer::new(self.id.clone(), Arc::clone(&sensors)).with_monitor(monitor);
        if let Some(backend) = self.span_backend {
            tracer = tracer.with_backend(backend);
        }

        Application {
            id: self.id,
            sender,
            signals,
            emitter,
            sensors,
            agents,
            tracer,
            config: self.config,
            config_path: self.config_path,
            conf: OnceLock::new(),
            configure_lock: tokio::sync::Mutex::new(()),
            rebalance_lock: tokio::sync::Mutex::new(()),
            discover_hooks: Mutex::new(Vec::new()),
        }
    }
}

/// A stream-processing application instance
pub struct Application {
    id: String,
    sender: SenderId,
    signals: Arc<SignalBus>,
    emitter: SignalEmitter,
    sensors: Arc<Sensors>,
    agents: AgentManager,
    tracer: RebalanceTracer,
    config: Option<Config>,
    config_path: Option<PathBuf>,
    conf: OnceLock<Config>,
    configure_lock: tokio::sync::Mutex<()>,
    rebalance_lock: tokio::sync::Mutex<()>,
    discover_hooks: Mutex<Vec<DiscoverHook>>,
}

impl Application {
    pub fn builder(id: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder {
            id: id.into(),
            config: None,
            config_path: None,
            monitor: None,
            span_backend: None,
        }
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self::builder(id).build()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity of this instance; unique even between equal ids
    pub fn sender(&self) -> SenderId {
        self.sender
    }

    /// The instance bus
    pub fn signals(&self) -> &Arc<SignalBus> {
        &self.signals
    }

    pub fn emitter(&self) -> &SignalEmitter {
        &self.emitter
    }

    pub fn agents(&self) -> &AgentManager {
        &self.agents
    }

    pub fn tracer(&self) -> &RebalanceTracer {
        &self.tracer
    }

    pub fn sensors(&self) -> &Arc<Sensors> {
        &self.sensors
    }

    // === Configuration ===

    /// The resolved configuration, once `configure` has run
    pub fn conf(&self) -> Option<&Config> {
        self.conf.get()
    }

    /// Resolve the configuration on first call
    ///
    /// Sends `BeforeConfigured`, loads and validates the configuration,
    /// applies it to the components, then sends `AfterConfigured`. Later
    /// calls return the stored configuration without signalling again.
    pub async fn configure(&self) -> Result<&Config> {
        if let Some(conf) = self.conf.get() {
            return Ok(conf);
        }
        let _guard = self.configure_lock.lock().await;
        if let Some(conf) = self.conf.get() {
            return Ok(conf);
        }

        debug!(app_id = %self.id, "configure: called");
        self.emitter
            .before_configured()
            .await
            .context("before-configured listeners failed")?;

        let config = match &self.config {
            Some(config) => config.clone(),
            None => Config::load(self.config_path.as_ref()).context("Failed to load configuration")?,
        };
        config.validate().context("Invalid configuration")?;

        self.agents.apply_config(&config.agents);
        self.tracer.apply_config(&config.rebalance);
        let conf = self.conf.get_or_init(|| config);
        info!(app_id = %self.id, broker = %conf.app.broker, "Application configured");

        self.emitter
            .after_configured()
            .await
            .context("after-configured listeners failed")?;
        Ok(conf)
    }

    // === Topics ===

    /// Start a topic description over concrete names
    pub fn topic<I, S>(&self, names: I) -> TopicBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TopicDescriptor::builder().topics(names)
    }

    /// Start a topic description over a name pattern
    pub fn topic_pattern(&self, pattern: impl Into<String>) -> TopicBuilder {
        TopicDescriptor::builder().pattern(pattern)
    }

    /// Creation requests for an internal topic, using configured defaults
    pub fn topic_creation_requests(&self, descriptor: &TopicDescriptor) -> Vec<TopicCreation> {
        let defaults = self.conf().map(|c| c.topics.clone()).unwrap_or_else(TopicsConfig::default);
        descriptor.creation_requests(&defaults)
    }

    // === Agents ===

    pub fn agent(&self, def: AgentDef) -> Result<AgentHandle, LifecycleError> {
        self.agents.register(def)
    }

    /// Register a hook that `discover` runs
    pub fn on_discover(&self, hook: impl Fn(&Application) -> Result<()> + Send + Sync + 'static) {
        self.discover_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(hook));
    }

    /// Run every discovery hook in registration order; returns how many ran
    pub fn discover(&self) -> Result<usize> {
        let hooks: Vec<DiscoverHook> = self.discover_hooks.lock().unwrap_or_else(|e| e.into_inner()).clone();
        debug!(app_id = %self.id, count = hooks.len(), "discover: called");
        for (i, hook) in hooks.iter().enumerate() {
            hook(self).with_context(|| format!("Discovery hook {} failed", i))?;
        }
        info!(app_id = %self.id, hooks = hooks.len(), agents = self.agents.len(), "Discovery complete");
        Ok(hooks.len())
    }

    /// Initialize and hand over to the bootstrap
    ///
    /// Configuration is finalized first, then discovery runs when
    /// `app.autodiscover` is set. Agents are registered but not started.
    pub async fn main(&self, bootstrap: &dyn Bootstrap) -> Result<()> {
        debug!(app_id = %self.id, "main: called");
        let conf = self.configure().await?;
        if conf.app.autodiscover {
            self.discover()?;
        }
        info!(app_id = %self.id, agents = self.agents.len(), "Application initialized");
        bootstrap.run(self).await
    }

    /// `main` with the worker bootstrap
    pub async fn run(&self) -> Result<()> {
        self.main(&WorkerBootstrap).await
    }

    /// Configure if needed, then start every agent
    pub async fn start(&self) -> Result<StartReport> {
        self.configure().await?;
        Ok(self.agents.start_all().await?)
    }

    pub async fn stop(&self) -> Result<StopReport, LifecycleError> {
        self.agents.stop_all().await
    }

    /// Stop agents if running and tear down the instance bus
    pub async fn shutdown(&self) -> Result<Option<StopReport>> {
        debug!(app_id = %self.id, "shutdown: called");
        let report = match self.agents.phase() {
            ManagerPhase::Running => Some(self.agents.stop_all().await?),
            _ => None,
        };
        self.signals.teardown();
        info!(app_id = %self.id, "Application shut down");
        Ok(report)
    }

    // === Signals ===

    /// Connect a listener to this instance's signals only
    pub fn connect(&self, signal: Signal, listener: Arc<dyn Listener>) -> Connection {
        self.signals.connect(signal, listener, Some(self.sender))
    }

    /// Like `connect`, but the listener is spawned rather than awaited
    pub fn connect_detached(&self, signal: Signal, listener: Arc<dyn Listener>) -> Connection {
        self.signals.connect_detached(signal, listener, Some(self.sender))
    }

    /// Connect a listener to this signal from every application in the process
    pub fn connect_global(signal: Signal, listener: Arc<dyn Listener>) -> Connection {
        SignalBus::global().connect(signal, listener, None)
    }

    /// Remove a connection made on this instance's bus or the global bus
    ///
    /// The connection is routed to the bus that issued it. Connections from
    /// another application's bus are left alone.
    pub fn disconnect(&self, connection: &Connection) -> bool {
        let global = SignalBus::global();
        if connection.bus_id() == self.signals.id() {
            self.signals.disconnect(connection)
        } else if connection.bus_id() == global.id() {
            global.disconnect(connection)
        } else {
            debug!(app_id = %self.id, bus = connection.bus_id(), "disconnect: connection from a foreign bus");
            false
        }
    }

    // === Rebalance ===

    /// Partitions were taken away from this application
    ///
    /// Returns once every affected agent has been paused.
    pub async fn on_partitions_revoked(&self, revoked: Assignment) -> RevokeOutcome {
        let _guard = self.rebalance_lock.lock().await;
        debug!(app_id = %self.id, partitions = %revoked, "on_partitions_revoked: called");

        let mut anomalies = Vec::new();
        let start = self.tracer.begin_revoke(&revoked);
        anomalies.extend(start.anomaly);

        let report = self.agents.on_partitions_revoked(&revoked).await;
        let dispatch_error = self.emitter.partitions_revoked(&revoked).await.err();
        if let Some(e) = &dispatch_error {
            warn!(app_id = %self.id, error = %e, "Partitions-revoked listeners failed");
        }

        if let Err(anomaly) = self.tracer.revoke_completed(report.failures.len()) {
            anomalies.push(anomaly);
        }

        RevokeOutcome {
            span_id: start.span_id,
            report,
            anomalies,
            dispatch_error,
        }
    }

    /// Partitions were handed to this application
    pub async fn on_partitions_assigned(&self, assigned: Assignment) -> AssignOutcome {
        let _guard = self.rebalance_lock.lock().await;
        debug!(app_id = %self.id, partitions = %assigned, "on_partitions_assigned: called");

        let mut anomalies = Vec::new();
        let permit = match self.tracer.assign_permit() {
            Ok(permit) => permit,
            Err(_) => {
                let (permit, anomaly) = self.tracer.open_for_assign();
                anomalies.extend(anomaly);
                permit
            }
        };

        let report = self.agents.on_partitions_assigned(&assigned, &permit).await;
        let dispatch_error = self.emitter.partitions_assigned(&assigned).await.err();
        if let Some(e) = &dispatch_error {
            warn!(app_id = %self.id, error = %e, "Partitions-assigned listeners failed");
        }

        let span = match self.tracer.finish_assign(permit, &assigned, report.failures.len()) {
            Ok(span) => Some(span),
            Err(anomaly) => {
                anomalies.push(anomaly);
                None
            }
        };

        AssignOutcome {
            span,
            report,
            anomalies,
            dispatch_error,
        }
    }
}
