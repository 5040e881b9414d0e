//! Monitor - observability sink for rebalance spans and warnings

use tracing::{info, warn};

use super::span::RebalanceSpan;
use crate::error::{MonitorError, RebalanceAnomaly};

/// Receives rebalance spans and anomaly warnings
///
/// Calls happen after the tracer's state has been updated and outside its
/// lock. An `Err` is logged as degraded observability and otherwise ignored.
pub trait Monitor: Send + Sync {
    /// A span entered `revoking`
    fn record_revoke_start(&self, _span: &RebalanceSpan) -> Result<(), MonitorError> {
        Ok(())
    }

    /// A span closed, completed or interrupted
    fn record_span(&self, span: &RebalanceSpan) -> Result<(), MonitorError>;

    fn record_rebalance_warning(&self, anomaly: &RebalanceAnomaly) -> Result<(), MonitorError>;
}

/// Monitor that writes to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMonitor;

impl Monitor for LogMonitor {
    fn record_revoke_start(&self, span: &RebalanceSpan) -> Result<(), MonitorError> {
        info!(app_id = %span.app_id, span_id = span.id, "Rebalance started");
        Ok(())
    }

    fn record_span(&self, span: &RebalanceSpan) -> Result<(), MonitorError> {
        info!(
            app_id = %span.app_id,
            span_id = span.id,
            outcome = ?span.outcome,
            revoked = span.revoked.len(),
            assigned = span.assigned.len(),
            elapsed = ?span.elapsed,
            delta = ?span.delta,
            "Rebalance span closed"
        );
        Ok(())
    }

    fn record_rebalance_warning(&self, anomaly: &RebalanceAnomaly) -> Result<(), MonitorError> {
        warn!(%anomaly, "Rebalance anomaly");
        Ok(())
    }
}
