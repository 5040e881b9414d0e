//! Instance identity for signal senders

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one Application instance as seen by the signal bus
///
/// Generated once per Application. Two applications constructed with the
/// same `id` string still get distinct sender identities, so sender-scoped
/// listeners never fire for a sibling instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SenderId(Uuid);

impl SenderId {
    /// Mint a fresh, time-ordered sender identity
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SenderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
