//! RebalanceSpan - one revoke → assign cycle

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sensors::{SensorDelta, SensorSnapshot};
use crate::domain::Assignment;

/// Tracer state, and the phase a span is in (closed spans rest in `Idle`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalancePhase {
    Idle,
    Revoking,
    Assigning,
}

impl fmt::Display for RebalancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalancePhase::Idle => write!(f, "idle"),
            RebalancePhase::Revoking => write!(f, "revoking"),
            RebalancePhase::Assigning => write!(f, "assigning"),
        }
    }
}

/// How a span ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanOutcome {
    /// Still open
    Open,
    /// Revoke and assign both handled
    Completed,
    /// Force-closed by an overlapping revoke
    Interrupted,
}

/// A phase the span entered and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMark {
    pub phase: RebalancePhase,
    pub at: DateTime<Utc>,
}

/// Tracked interval of one rebalance with its sensor measurements
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceSpan {
    pub id: u64,
    pub app_id: String,
    pub started_at: DateTime<Utc>,
    pub phase: RebalancePhase,
    pub history: Vec<PhaseMark>,
    pub revoked: Assignment,
    pub assigned: Assignment,
    pub revoke_failures: usize,
    pub assign_failures: usize,
    pub before: SensorSnapshot,
    pub after: Option<SensorSnapshot>,
    pub delta: Option<SensorDelta>,
    pub elapsed: Option<Duration>,
    pub outcome: SpanOutcome,
    #[serde(skip)]
    opened: Instant,
}

impl RebalanceSpan {
    pub(crate) fn open(id: u64, app_id: &str, phase: RebalancePhase, before: SensorSnapshot) -> Self {
        let started_at = Utc::now();
        Self {
            id,
            app_id: app_id.to_string(),
            started_at,
            phase,
            history: vec![PhaseMark { phase, at: started_at }],
            revoked: Assignment::new(),
            assigned: Assignment::new(),
            revoke_failures: 0,
            assign_failures: 0,
            before,
            after: None,
            delta: None,
            elapsed: None,
            outcome: SpanOutcome::Open,
            opened: Instant::now(),
        }
    }

    pub(crate) fn enter(&mut self, phase: RebalancePhase) {
        self.phase = phase;
        self.history.push(PhaseMark { phase, at: Utc::now() });
    }

    pub(crate) fn close(&mut self, outcome: SpanOutcome, after: SensorSnapshot) {
        self.enter(RebalancePhase::Idle);
        self.delta = Some(self.before.delta(&after));
        self.after = Some(after);
        self.elapsed = Some(self.opened.elapsed());
        self.outcome = outcome;
    }

    /// Phases entered, in order
    pub fn phases(&self) -> Vec<RebalancePhase> {
        self.history.iter().map(|m| m.phase).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.outcome != SpanOutcome::Open
    }
}
