//! Topic descriptors
//!
//! A topic is a named, partitioned channel that lives on the broker. This
//! module only builds and validates descriptors; creating topics and moving
//! messages belong to the transport collaborator.
//!
//! ```rust,ignore
//! use streamjobs::topic::TopicDescriptor;
//!
//! let orders = TopicDescriptor::builder()
//!     .topic("orders")
//!     .partitions(8)
//!     .value_serializer("json")
//!     .build()?;
//! ```

mod creation;
mod descriptor;

pub use creation::TopicCreation;
pub use descriptor::{Retention, TopicBuilder, TopicDescriptor, TopicOptions, TopicPattern, TopicSources, build};
