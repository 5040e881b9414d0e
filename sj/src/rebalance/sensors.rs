//! Sensor counters sampled at rebalance phase boundaries
//!
//! Counters are shared between the application, its agents and the
//! rebalance tracer:
//! - Messages received (monotonic)
//! - Messages in flight (gauge)
//! - Consumer lag estimate (gauge, set by the transport collaborator)

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Process-local sensor counters (thread-safe)
#[derive(Debug, Default)]
pub struct Sensors {
    messages_received: AtomicU64,
    messages_in_flight: AtomicU64,
    lag_estimate: AtomicU64,
}

impl Sensors {
    pub fn new() -> Self {
        Self::default()
    }

    /// A message was handed to an agent
    pub fn on_message_in(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.messages_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// An agent finished processing a message
    pub fn on_message_out(&self) {
        let _ = self
            .messages_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn set_lag_estimate(&self, lag: u64) {
        self.lag_estimate.store(lag, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        let snapshot = SensorSnapshot {
            taken_at: Utc::now(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_in_flight: self.messages_in_flight.load(Ordering::Relaxed),
            lag_estimate: self.lag_estimate.load(Ordering::Relaxed),
        };
        debug!(
            received = snapshot.messages_received,
            in_flight = snapshot.messages_in_flight,
            lag = snapshot.lag_estimate,
            "Sensors::snapshot"
        );
        snapshot
    }
}

/// Point-in-time copy of the sensor counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub taken_at: DateTime<Utc>,
    pub messages_received: u64,
    pub messages_in_flight: u64,
    pub lag_estimate: u64,
}

impl SensorSnapshot {
    /// Change from `self` to `after`
    pub fn delta(&self, after: &SensorSnapshot) -> SensorDelta {
        SensorDelta {
            messages_received: diff(self.messages_received, after.messages_received),
            messages_in_flight: diff(self.messages_in_flight, after.messages_in_flight),
            lag_estimate: diff(self.lag_estimate, after.lag_estimate),
        }
    }
}

fn diff(before: u64, after: u64) -> i64 {
    (after as i128 - before as i128).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Signed change of each counter across a span
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDelta {
    pub messages_received: i64,
    pub messages_in_flight: i64,
    pub lag_estimate: i64,
}
