//! Domain types shared by every component
//!
//! Sender identities and the partition/assignment vocabulary used by the
//! rebalance path.

mod id;
mod partition;

pub use id::SenderId;
pub use partition::{Assignment, TopicPartition};
