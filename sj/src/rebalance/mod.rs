//! Rebalance tracking - spans over revoke/assign cycles
//!
//! The [`RebalanceTracer`] follows `idle → revoking → assigning → idle` for
//! one application, measuring each cycle as a [`RebalanceSpan`] with sensor
//! snapshots taken when the span opens and closes. Closed spans are
//! forwarded to an optional [`Monitor`] and, when a [`SpanBackend`] is
//! configured, mirrored as external tracing spans.

mod backend;
mod monitor;
mod sensors;
mod span;
mod tracer;

pub use backend::{SpanBackend, SpanTags, SpanToken, TracingSpanBackend};
#[cfg(test)]
pub use monitor::mock;
pub use monitor::{LogMonitor, Monitor};
pub use sensors::{SensorDelta, SensorSnapshot, Sensors};
pub use span::{PhaseMark, RebalancePhase, RebalanceSpan, SpanOutcome};
pub use tracer::{AssignPermit, RebalanceTracer, RevokeStart};
