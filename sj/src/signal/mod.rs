//! Signals - lifecycle event dispatch with local and global scopes
//!
//! Every application owns an instance [`SignalBus`]; listeners connected
//! there are filtered to that application's [`SenderId`](crate::domain::SenderId)
//! and never observe sibling instances in the same process. A separate
//! process-wide bus ([`SignalBus::global`]) receives every application's
//! signals for listeners that opt in explicitly.
//!
//! ```text
//!   app.connect(signal, l)          App::connect_global(signal, l)
//!            │                                  │
//!            ▼                                  ▼
//!   ┌──────────────────┐   then    ┌──────────────────────┐
//!   │ instance bus     │ ────────► │ global bus (static)  │
//!   │ (signal, Some(s))│           │ (signal, None)       │
//!   └──────────────────┘           └──────────────────────┘
//! ```
//!
//! Within one dispatch, sender-filtered listeners run before unfiltered
//! ones, each group in connection order, one listener at a time.
//!
//! # Usage
//!
//! ```rust,ignore
//! use streamjobs::signal::{Signal, listener_fn};
//!
//! app.connect(Signal::PartitionsAssigned, listener_fn("warmup", |event| async move {
//!     tracing::info!(partitions = ?event.assignment(), "warming caches");
//!     Ok(())
//! }));
//! ```

mod bus;
mod emitter;
mod listener;
mod types;

pub use bus::{Connection, DispatchMode, Dispatched, GLOBAL_BUS_LABEL, SignalBus};
pub use emitter::SignalEmitter;
pub use listener::{FnListener, Listener, listener_fn};
pub use types::{Signal, SignalEvent, SignalPayload};
