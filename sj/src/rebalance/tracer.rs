//! RebalanceTracer - the revoke/assign state machine
//!
//! ```text
//!          begin_revoke            revoke_completed          finish_assign
//!   Idle ───────────────► Revoking ────────────────► Assigning ────────────► Idle
//!                            ▲  │ begin_revoke            │
//!                            │  └─ (extends span)         │ begin_revoke
//!                            └────────────────────────────┘ (interrupt + reopen)
//! ```
//!
//! At most one span is open at a time. State changes happen under the
//! tracer's lock; monitor and backend calls are collected while the lock
//! is held and made after it is released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::backend::{SpanBackend, SpanTags, SpanToken};
use super::monitor::Monitor;
use super::sensors::Sensors;
use super::span::{RebalancePhase, RebalanceSpan, SpanOutcome};
use crate::config::RebalanceConfig;
use crate::domain::Assignment;
use crate::error::{MonitorError, RebalanceAnomaly};

/// Result of `begin_revoke`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeStart {
    /// The span now in `revoking`
    pub span_id: u64,
    /// The revoke joined a span that was already revoking
    pub extended: bool,
    /// Set when an assigning span was interrupted
    pub anomaly: Option<RebalanceAnomaly>,
}

/// Proof that the tracer is in `assigning` for a given span
///
/// Only the tracer creates permits, and only once the revoke phase of that
/// span has closed. Assign handling in the agent manager requires one.
#[derive(Debug)]
pub struct AssignPermit {
    span_id: u64,
}

impl AssignPermit {
    pub fn span_id(&self) -> u64 {
        self.span_id
    }
}

struct OpenSpan {
    span: RebalanceSpan,
    token: Option<SpanToken>,
}

struct TracerState {
    phase: RebalancePhase,
    current: Option<OpenSpan>,
    closed: VecDeque<RebalanceSpan>,
    history_limit: usize,
    trace_spans: bool,
    next_id: u64,
}

impl TracerState {
    fn open(&mut self, app_id: &str, phase: RebalancePhase, sensors: &Sensors) -> &mut OpenSpan {
        let id = self.next_id;
        self.next_id += 1;
        self.phase = phase;
        self.current.insert(OpenSpan {
            span: RebalanceSpan::open(id, app_id, phase, sensors.snapshot()),
            token: None,
        })
    }

    fn close(&mut self, outcome: SpanOutcome, sensors: &Sensors) -> Option<(RebalanceSpan, Option<SpanToken>)> {
        let mut open = self.current.take()?;
        open.span.close(outcome, sensors.snapshot());
        self.phase = RebalancePhase::Idle;

        self.closed.push_back(open.span.clone());
        while self.closed.len() > self.history_limit {
            self.closed.pop_front();
        }
        Some((open.span, open.token))
    }
}

enum Effect {
    Started { span: RebalanceSpan, trace: bool, revoke: bool },
    Warning(RebalanceAnomaly),
    Closed { span: RebalanceSpan, token: Option<SpanToken> },
}

/// Tracks rebalance spans for one application
pub struct RebalanceTracer {
    app_id: String,
    sensors: Arc<Sensors>,
    state: Mutex<TracerState>,
    monitor: Option<Arc<dyn Monitor>>,
    backend: Option<Arc<dyn SpanBackend>>,
    degraded: AtomicU64,
}

impl RebalanceTracer {
    pub fn new(app_id: impl Into<String>, sensors: Arc<Sensors>) -> Self {
        let defaults = RebalanceConfig::default();
        Self {
            app_id: app_id.into(),
            sensors,
            state: Mutex::new(TracerState {
                phase: RebalancePhase::Idle,
                current: None,
                closed: VecDeque::new(),
                history_limit: defaults.span_history,
                trace_spans: defaults.trace_spans,
                next_id: 1,
            }),
            monitor: None,
            backend: None,
            degraded: AtomicU64::new(0),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn SpanBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn apply_config(&self, config: &RebalanceConfig) {
        debug!(app_id = %self.app_id, span_history = config.span_history, trace_spans = config.trace_spans, "RebalanceTracer::apply_config: called");
        let mut state = self.lock();
        state.trace_spans = config.trace_spans;
        state.history_limit = config.span_history;
        while state.closed.len() > state.history_limit {
            state.closed.pop_front();
        }
    }

    pub fn set_history_limit(&self, limit: usize) {
        let mut state = self.lock();
        state.history_limit = limit;
        while state.closed.len() > limit {
            state.closed.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, TracerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // === Transitions ===

    /// Partitions were revoked
    ///
    /// From `idle` a new span is opened. While `revoking` the partitions
    /// join the open span. While `assigning` the open span is closed as
    /// interrupted and a fresh one is opened.
    pub fn begin_revoke(&self, revoked: &Assignment) -> RevokeStart {
        debug!(app_id = %self.app_id, partitions = %revoked, "RebalanceTracer::begin_revoke: called");
        let mut effects = Vec::new();

        let start = {
            let mut state = self.lock();
            match (state.phase, state.current.is_some()) {
                (RebalancePhase::Revoking, true) => {
                    let span_id = state
                        .current
                        .as_mut()
                        .map(|open| {
                            open.span.revoked.extend_from(revoked);
                            open.span.id
                        })
                        .unwrap_or_default();
                    debug!(app_id = %self.app_id, span_id, "RebalanceTracer::begin_revoke: extending revoking span");
                    RevokeStart {
                        span_id,
                        extended: true,
                        anomaly: None,
                    }
                }
                (phase, _) => {
                    let mut anomaly = None;
                    if phase == RebalancePhase::Assigning
                        && let Some((span, token)) = state.close(SpanOutcome::Interrupted, &self.sensors)
                    {
                        let interrupted = RebalanceAnomaly::OverlappingRebalance {
                            interrupted_span: span.id,
                        };
                        effects.push(Effect::Warning(interrupted.clone()));
                        effects.push(Effect::Closed { span, token });
                        anomaly = Some(interrupted);
                    }

                    let trace = state.trace_spans;
                    let open = state.open(&self.app_id, RebalancePhase::Revoking, &self.sensors);
                    open.span.revoked.extend_from(revoked);
                    let span_id = open.span.id;
                    effects.push(Effect::Started {
                        span: open.span.clone(),
                        trace,
                        revoke: true,
                    });
                    RevokeStart {
                        span_id,
                        extended: false,
                        anomaly,
                    }
                }
            }
        };

        self.publish(effects);
        start
    }

    /// Revoke handling finished; `failures` agents reported errors
    pub fn revoke_completed(&self, failures: usize) -> Result<(), RebalanceAnomaly> {
        debug!(app_id = %self.app_id, failures, "RebalanceTracer::revoke_completed: called");
        let result = {
            let mut state = self.lock();
            let phase = state.phase;
            match state.current.as_mut() {
                Some(open) if phase == RebalancePhase::Revoking => {
                    open.span.revoke_failures += failures;
                    open.span.enter(RebalancePhase::Assigning);
                    state.phase = RebalancePhase::Assigning;
                    Ok(())
                }
                _ => Err(RebalanceAnomaly::OutOfOrder {
                    expected: RebalancePhase::Revoking,
                    actual: phase,
                }),
            }
        };

        if let Err(anomaly) = &result {
            self.publish(vec![Effect::Warning(anomaly.clone())]);
        }
        result
    }

    /// Permit for assign handling, only while `assigning`
    pub fn assign_permit(&self) -> Result<AssignPermit, RebalanceAnomaly> {
        let state = self.lock();
        match (state.phase, state.current.as_ref()) {
            (RebalancePhase::Assigning, Some(open)) => Ok(AssignPermit { span_id: open.span.id }),
            (RebalancePhase::Idle, _) => Err(RebalanceAnomaly::AssignWithoutRevoke),
            (actual, _) => Err(RebalanceAnomaly::OutOfOrder {
                expected: RebalancePhase::Assigning,
                actual,
            }),
        }
    }

    /// Move to `assigning` whatever the current phase, reporting the anomaly
    ///
    /// From `idle` a span is opened directly in `assigning` with nothing
    /// revoked. From `revoking` the revoke phase is closed as is.
    pub fn open_for_assign(&self) -> (AssignPermit, Option<RebalanceAnomaly>) {
        debug!(app_id = %self.app_id, "RebalanceTracer::open_for_assign: called");
        let mut effects = Vec::new();

        let (permit, anomaly) = {
            let mut state = self.lock();
            let phase = state.phase;
            match (phase, state.current.as_mut()) {
                (RebalancePhase::Assigning, Some(open)) => (AssignPermit { span_id: open.span.id }, None),
                (RebalancePhase::Revoking, Some(open)) => {
                    open.span.enter(RebalancePhase::Assigning);
                    let span_id = open.span.id;
                    state.phase = RebalancePhase::Assigning;
                    let anomaly = RebalanceAnomaly::OutOfOrder {
                        expected: RebalancePhase::Assigning,
                        actual: phase,
                    };
                    (AssignPermit { span_id }, Some(anomaly))
                }
                _ => {
                    let trace = state.trace_spans;
                    let open = state.open(&self.app_id, RebalancePhase::Assigning, &self.sensors);
                    let span_id = open.span.id;
                    effects.push(Effect::Started {
                        span: open.span.clone(),
                        trace,
                        revoke: false,
                    });
                    (AssignPermit { span_id }, Some(RebalanceAnomaly::AssignWithoutRevoke))
                }
            }
        };

        if let Some(anomaly) = &anomaly {
            effects.insert(0, Effect::Warning(anomaly.clone()));
        }
        self.publish(effects);
        (permit, anomaly)
    }

    /// Assign handling finished; closes the span
    pub fn finish_assign(
        &self,
        permit: AssignPermit,
        assigned: &Assignment,
        failures: usize,
    ) -> Result<RebalanceSpan, RebalanceAnomaly> {
        debug!(app_id = %self.app_id, span_id = permit.span_id, failures, "RebalanceTracer::finish_assign: called");
        let result = {
            let mut state = self.lock();
            let phase = state.phase;
            let matches = phase == RebalancePhase::Assigning
                && state.current.as_ref().is_some_and(|open| open.span.id == permit.span_id);

            if matches {
                if let Some(open) = state.current.as_mut() {
                    open.span.assigned.extend_from(assigned);
                    open.span.assign_failures += failures;
                }
                state
                    .close(SpanOutcome::Completed, &self.sensors)
                    .ok_or(RebalanceAnomaly::OutOfOrder {
                        expected: RebalancePhase::Assigning,
                        actual: phase,
                    })
            } else {
                Err(RebalanceAnomaly::OutOfOrder {
                    expected: RebalancePhase::Assigning,
                    actual: phase,
                })
            }
        };

        match result {
            Ok((span, token)) => {
                info!(
                    app_id = %self.app_id,
                    span_id = span.id,
                    revoked = span.revoked.len(),
                    assigned = span.assigned.len(),
                    elapsed = ?span.elapsed,
                    "Rebalance complete"
                );
                self.publish(vec![Effect::Closed {
                    span: span.clone(),
                    token,
                }]);
                Ok(span)
            }
            Err(anomaly) => {
                self.publish(vec![Effect::Warning(anomaly.clone())]);
                Err(anomaly)
            }
        }
    }

    // === Observation ===

    pub fn phase(&self) -> RebalancePhase {
        self.lock().phase
    }

    pub fn current_span(&self) -> Option<RebalanceSpan> {
        self.lock().current.as_ref().map(|open| open.span.clone())
    }

    /// Closed spans, oldest first, bounded by the history limit
    pub fn closed_spans(&self) -> Vec<RebalanceSpan> {
        self.lock().closed.iter().cloned().collect()
    }

    /// Monitor calls that failed
    pub fn degraded_reports(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    // === Side effects ===

    fn publish(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Started { span, trace, revoke } => {
                    if trace && let Some(backend) = &self.backend {
                        let token = backend.start_span("rebalance", &self.tags(&span));
                        self.attach_token(&span, token, backend.as_ref());
                    }
                    if revoke {
                        self.notify("record_revoke_start", |m| m.record_revoke_start(&span));
                    }
                }
                Effect::Warning(anomaly) => {
                    warn!(app_id = %self.app_id, %anomaly, "Rebalance anomaly");
                    self.notify("record_rebalance_warning", |m| m.record_rebalance_warning(&anomaly));
                }
                Effect::Closed { span, token } => {
                    if let (Some(backend), Some(token)) = (&self.backend, token) {
                        backend.finish_span(token, &self.tags(&span));
                    }
                    self.notify("record_span", |m| m.record_span(&span));
                }
            }
        }
    }

    fn attach_token(&self, span: &RebalanceSpan, token: SpanToken, backend: &dyn SpanBackend) {
        let attached = {
            let mut state = self.lock();
            match state.current.as_mut() {
                Some(open) if open.span.id == span.id => {
                    open.token = Some(token);
                    true
                }
                _ => false,
            }
        };
        if !attached {
            backend.finish_span(token, &self.tags(span));
        }
    }

    fn notify(&self, call: &str, f: impl FnOnce(&dyn Monitor) -> Result<(), MonitorError>) {
        let Some(monitor) = &self.monitor else {
            return;
        };
        if let Err(e) = f(monitor.as_ref()) {
            self.degraded.fetch_add(1, Ordering::Relaxed);
            warn!(app_id = %self.app_id, call, error = %e, "Monitor failed; rebalance observability degraded");
        }
    }

    fn tags(&self, span: &RebalanceSpan) -> SpanTags {
        SpanTags::from([
            ("app_id".to_string(), self.app_id.clone()),
            ("span_id".to_string(), span.id.to_string()),
            ("phase".to_string(), span.phase.to_string()),
            ("revoked".to_string(), span.revoked.len().to_string()),
            ("assigned".to_string(), span.assigned.len().to_string()),
            ("outcome".to_string(), format!("{:?}", span.outcome).to_lowercase()),
        ])
    }
}
