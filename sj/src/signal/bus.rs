//! Signal Bus - two-tier dispatch of lifecycle signals
//!
//! Connections are stored under `(signal, sender filter)`. A dispatch for
//! sender `S` runs the listeners filtered to `S` first, then the unfiltered
//! ones, each tier in connection order. Listeners are awaited one at a time
//! unless connected detached. The connection table is only locked while the
//! listener list is copied out, never across a listener await, so a
//! listener may send on the same bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, RwLock};

use tracing::{debug, warn};

use super::listener::Listener;
use super::types::{Signal, SignalEvent};
use crate::domain::SenderId;
use crate::error::{DispatchError, ListenerFailure, ListenerScope};

/// Label of the process-wide bus
pub const GLOBAL_BUS_LABEL: &str = "global";

static GLOBAL_BUS: LazyLock<SignalBus> = LazyLock::new(|| SignalBus::with_scope(GLOBAL_BUS_LABEL.to_string(), true));

static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(1);

/// How a listener is run during a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Completes before the next listener starts
    Awaited,
    /// Spawned and not waited for
    Detached,
}

/// Handle returned by `connect`, used to disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    bus: u64,
    id: u64,
    signal: Signal,
    sender: Option<SenderId>,
    listener: String,
}

impl Connection {
    /// Id of the bus that issued this connection
    pub fn bus_id(&self) -> u64 {
        self.bus
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn sender(&self) -> Option<SenderId> {
        self.sender
    }

    pub fn listener(&self) -> &str {
        &self.listener
    }
}

/// Summary of a completed dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatched {
    /// Awaited listeners that ran to completion (successfully or not)
    pub awaited: usize,
    /// Detached listeners that were spawned
    pub detached: usize,
    /// The bus was torn down before every listener ran
    pub cancelled: bool,
}

impl Dispatched {
    fn absorb(&mut self, other: Dispatched) {
        self.awaited += other.awaited;
        self.detached += other.detached;
        self.cancelled |= other.cancelled;
    }
}

struct Slot {
    id: u64,
    listener: Arc<dyn Listener>,
    mode: DispatchMode,
}

type SlotKey = (Signal, Option<SenderId>);

/// Typed event dispatch with local (sender-filtered) and global scopes
pub struct SignalBus {
    id: u64,
    label: String,
    global: bool,
    slots: RwLock<HashMap<SlotKey, Vec<Slot>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl SignalBus {
    /// Create an empty bus
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_scope(label.into(), false)
    }

    fn with_scope(label: String, global: bool) -> Self {
        let id = NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed);
        debug!(%label, id, global, "SignalBus::new: creating signal bus");
        Self {
            id,
            label,
            global,
            slots: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// The process-wide bus, created on first use and never torn down
    pub fn global() -> &'static SignalBus {
        &GLOBAL_BUS
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Process-unique id, recorded in every [`Connection`] this bus issues
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Connect an awaited listener
    ///
    /// With `sender = None` the listener fires for every sender; otherwise
    /// only for that sender.
    pub fn connect(&self, signal: Signal, listener: Arc<dyn Listener>, sender: Option<SenderId>) -> Connection {
        self.connect_with(signal, listener, sender, DispatchMode::Awaited)
    }

    /// Connect a fire-and-forget listener
    pub fn connect_detached(
        &self,
        signal: Signal,
        listener: Arc<dyn Listener>,
        sender: Option<SenderId>,
    ) -> Connection {
        self.connect_with(signal, listener, sender, DispatchMode::Detached)
    }

    /// Connect with an explicit dispatch mode
    ///
    /// Reconnecting a listener name under the same key replaces the earlier
    /// connection in place and keeps its position and id.
    pub fn connect_with(
        &self,
        signal: Signal,
        listener: Arc<dyn Listener>,
        sender: Option<SenderId>,
        mode: DispatchMode,
    ) -> Connection {
        let name = listener.name().to_string();
        debug!(bus = %self.label, %signal, listener = %name, ?sender, ?mode, "SignalBus::connect: called");

        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let entries = slots.entry((signal, sender)).or_default();

        let id = if let Some(slot) = entries.iter_mut().find(|s| s.listener.name() == name) {
            debug!(bus = %self.label, %signal, listener = %name, "SignalBus::connect: replacing existing connection");
            slot.listener = listener;
            slot.mode = mode;
            slot.id
        } else {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            entries.push(Slot { id, listener, mode });
            id
        };

        Connection {
            bus: self.id,
            id,
            signal,
            sender,
            listener: name,
        }
    }

    /// Remove a connection; returns false if it was already gone or was
    /// issued by another bus
    pub fn disconnect(&self, connection: &Connection) -> bool {
        debug!(bus = %self.label, signal = %connection.signal, listener = %connection.listener, "SignalBus::disconnect: called");
        if connection.bus != self.id {
            debug!(bus = %self.label, issued_by = connection.bus, "SignalBus::disconnect: connection belongs to another bus");
            return false;
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let key = (connection.signal, connection.sender);
        let Some(entries) = slots.get_mut(&key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|s| s.id != connection.id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            slots.remove(&key);
        }
        removed
    }

    /// Number of connections for a signal across every sender filter
    pub fn listener_count(&self, signal: Signal) -> usize {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots
            .iter()
            .filter(|((s, _), _)| *s == signal)
            .map(|(_, entries)| entries.len())
            .sum()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop every connection and stop in-flight dispatches
    ///
    /// A dispatch already running finishes its current listener and skips
    /// the rest. Later sends dispatch nothing. The process-wide bus lives as
    /// long as the process; tearing it down is refused.
    pub fn teardown(&self) {
        debug!(bus = %self.label, "SignalBus::teardown: called");
        if self.global {
            warn!(bus = %self.label, "Refusing to tear down the process-wide signal bus");
            return;
        }
        self.closed.store(true, Ordering::SeqCst);
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.clear();
    }

    /// Dispatch `event` to its local listeners, then its global listeners
    ///
    /// Every awaited listener is attempted even when an earlier one fails;
    /// failures are returned together once the dispatch is over.
    pub async fn send(&self, event: &SignalEvent) -> Result<Dispatched, DispatchError> {
        debug!(
            bus = %self.label,
            signal = %event.signal,
            sender = %event.sender,
            app_id = %event.app_id,
            "SignalBus::send: called"
        );

        let queue = self.snapshot(event.signal, event.sender);
        let mut dispatched = Dispatched::default();
        let mut failures = Vec::new();

        for (scope, listener, mode) in queue {
            if self.is_closed() {
                debug!(bus = %self.label, signal = %event.signal, "SignalBus::send: bus closed, cancelling dispatch");
                dispatched.cancelled = true;
                break;
            }

            match mode {
                DispatchMode::Awaited => {
                    debug!(bus = %self.label, listener = listener.name(), %scope, "SignalBus::send: invoking listener");
                    if let Err(e) = listener.handle(event).await {
                        warn!(
                            bus = %self.label,
                            signal = %event.signal,
                            listener = listener.name(),
                            error = %e,
                            "Signal listener failed"
                        );
                        failures.push(ListenerFailure {
                            listener: listener.name().to_string(),
                            scope,
                            message: format!("{:#}", e),
                        });
                    }
                    dispatched.awaited += 1;
                }
                DispatchMode::Detached => {
                    debug!(bus = %self.label, listener = listener.name(), %scope, "SignalBus::send: spawning detached listener");
                    let event = event.clone();
                    tokio::spawn(async move {
                        if let Err(e) = listener.handle(&event).await {
                            warn!(
                                signal = %event.signal,
                                listener = listener.name(),
                                error = %e,
                                "Detached signal listener failed"
                            );
                        }
                    });
                    dispatched.detached += 1;
                }
            }
        }

        debug!(
            bus = %self.label,
            signal = %event.signal,
            awaited = dispatched.awaited,
            detached = dispatched.detached,
            failed = failures.len(),
            "SignalBus::send: complete"
        );

        if failures.is_empty() {
            Ok(dispatched)
        } else {
            Err(DispatchError {
                signal: event.signal,
                failures,
            })
        }
    }

    /// Copy out the ordered listener queue for one dispatch
    fn snapshot(&self, signal: Signal, sender: SenderId) -> Vec<(ListenerScope, Arc<dyn Listener>, DispatchMode)> {
        if self.is_closed() {
            return Vec::new();
        }
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        let local = slots.get(&(signal, Some(sender))).into_iter().flatten();
        let global = slots.get(&(signal, None)).into_iter().flatten();

        local
            .map(|s| (ListenerScope::Local, Arc::clone(&s.listener), s.mode))
            .chain(global.map(|s| (ListenerScope::Global, Arc::clone(&s.listener), s.mode)))
            .collect()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Send `event` on `first` and then `second`, merging the outcomes
///
/// The second bus runs even when the first reported listener failures.
pub(crate) async fn send_both(
    first: &SignalBus,
    second: &SignalBus,
    event: &SignalEvent,
) -> Result<Dispatched, DispatchError> {
    let mut dispatched = Dispatched::default();
    let mut error: Option<DispatchError> = None;

    for bus in [first, second] {
        match bus.send(event).await {
            Ok(d) => dispatched.absorb(d),
            Err(e) => {
                error = Some(match error {
                    Some(prev) => prev.merge(e),
                    None => e,
                });
            }
        }
    }

    match error {
        Some(e) => Err(e),
        None => Ok(dispatched),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::listener::listener_fn;
    use crate::signal::types::SignalPayload;
    use std::sync::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(name: &str, log: &Log) -> Arc<dyn Listener> {
        let log = Arc::clone(log);
        let label = name.to_string();
        listener_fn(name, move |event: SignalEvent| {
            let log = Arc::clone(&log);
            let label = label.clone();
            async move {
                log.lock().unwrap().push(format!("{}:{}", label, event.app_id));
                Ok(())
            }
        })
    }

    fn failing(name: &str) -> Arc<dyn Listener> {
        let label = name.to_string();
        listener_fn(name, move |_event: SignalEvent| {
            let label = label.clone();
            async move { Err(eyre::eyre!("{} exploded", label)) }
        })
    }

    fn event(signal: Signal, sender: SenderId, app_id: &str) -> SignalEvent {
        SignalEvent::new(signal, sender, app_id, SignalPayload::Configured)
    }

    #[tokio::test]
    async fn test_global_listener_fires_once_per_send() {
        let bus = SignalBus::new("test");
        let log: Log = Arc::default();
        let a = SenderId::new();
        let b = SenderId::new();

        bus.connect(Signal::AfterConfigured, recorder("local-a", &log), Some(a));
        bus.connect(Signal::AfterConfigured, recorder("global", &log), None);

        bus.send(&event(Signal::AfterConfigured, a, "A")).await.unwrap();
        bus.send(&event(Signal::AfterConfigured, b, "B")).await.unwrap();

        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["local-a:A", "global:A", "global:B"]);
    }

    #[tokio::test]
    async fn test_local_before_global_regardless_of_connect_order() {
        let bus = SignalBus::new("test");
        let log: Log = Arc::default();
        let a = SenderId::new();

        bus.connect(Signal::AgentStarted, recorder("g1", &log), None);
        bus.connect(Signal::AgentStarted, recorder("l1", &log), Some(a));
        bus.connect(Signal::AgentStarted, recorder("g2", &log), None);
        bus.connect(Signal::AgentStarted, recorder("l2", &log), Some(a));

        let dispatched = bus.send(&event(Signal::AgentStarted, a, "A")).await.unwrap();
        assert_eq!(dispatched.awaited, 4);

        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["l1:A", "l2:A", "g1:A", "g2:A"]);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_in_place() {
        let bus = SignalBus::new("test");
        let log: Log = Arc::default();
        let a = SenderId::new();

        let first = bus.connect(Signal::AgentStopped, recorder("x", &log), None);
        bus.connect(Signal::AgentStopped, recorder("y", &log), None);
        let second = bus.connect(Signal::AgentStopped, recorder("x", &log), None);

        assert_eq!(first, second);
        assert_eq!(bus.listener_count(Signal::AgentStopped), 2);

        bus.send(&event(Signal::AgentStopped, a, "A")).await.unwrap();
        assert_eq!(log.lock().unwrap().clone(), vec!["x:A", "y:A"]);
    }

    #[tokio::test]
    async fn test_same_name_different_filter_are_distinct() {
        let bus = SignalBus::new("test");
        let a = SenderId::new();
        let log: Log = Arc::default();

        bus.connect(Signal::AgentStopped, recorder("x", &log), None);
        bus.connect(Signal::AgentStopped, recorder("x", &log), Some(a));
        assert_eq!(bus.listener_count(Signal::AgentStopped), 2);

        bus.send(&event(Signal::AgentStopped, a, "A")).await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let bus = SignalBus::new("test");
        let log: Log = Arc::default();
        let a = SenderId::new();

        let conn = bus.connect(Signal::BeforeConfigured, recorder("x", &log), Some(a));
        assert!(bus.disconnect(&conn));
        assert!(!bus.disconnect(&conn));
        assert_eq!(bus.listener_count(Signal::BeforeConfigured), 0);

        let dispatched = bus.send(&event(Signal::BeforeConfigured, a, "A")).await.unwrap();
        assert_eq!(dispatched, Dispatched::default());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_ignores_other_bus() {
        let first = SignalBus::new("first");
        let second = SignalBus::new("second");
        let log: Log = Arc::default();
        let a = SenderId::new();
        assert_ne!(first.id(), second.id());

        // Same signal, filter and per-bus connection id on both buses
        let theirs = first.connect(Signal::AgentStarted, recorder("x", &log), None);
        let ours = second.connect(Signal::AgentStarted, recorder("y", &log), None);
        assert_eq!(theirs.bus_id(), first.id());
        assert_eq!(ours.bus_id(), second.id());

        assert!(!second.disconnect(&theirs));
        assert_eq!(second.listener_count(Signal::AgentStarted), 1);
        assert_eq!(first.listener_count(Signal::AgentStarted), 1);

        second.send(&event(Signal::AgentStarted, a, "A")).await.unwrap();
        assert_eq!(log.lock().unwrap().clone(), vec!["y:A"]);
    }

    #[tokio::test]
    async fn test_global_bus_survives_teardown() {
        let global = SignalBus::global();
        assert!(global.is_global());
        assert_eq!(global.label(), GLOBAL_BUS_LABEL);

        let log: Log = Arc::default();
        let a = SenderId::new();
        let conn = global.connect(Signal::AgentStarted, recorder("survives-teardown", &log), Some(a));

        global.teardown();
        assert!(!global.is_closed());
        assert!(global.listener_count(Signal::AgentStarted) >= 1);

        global.send(&event(Signal::AgentStarted, a, "A")).await.unwrap();
        assert_eq!(log.lock().unwrap().clone(), vec!["survives-teardown:A"]);
        assert!(global.disconnect(&conn));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_listeners() {
        let bus = SignalBus::new("test");
        let log: Log = Arc::default();
        let a = SenderId::new();

        bus.connect(Signal::PartitionsAssigned, failing("bad-local"), Some(a));
        bus.connect(Signal::PartitionsAssigned, recorder("good", &log), None);
        bus.connect(Signal::PartitionsAssigned, failing("bad-global"), None);

        let err = bus.send(&event(Signal::PartitionsAssigned, a, "A")).await.unwrap_err();
        assert_eq!(err.signal, Signal::PartitionsAssigned);
        assert_eq!(err.listeners(), vec!["bad-local", "bad-global"]);
        assert_eq!(err.failures[0].scope, ListenerScope::Local);
        assert_eq!(err.failures[1].scope, ListenerScope::Global);
        assert!(err.failures[0].message.contains("bad-local exploded"));
        assert_eq!(log.lock().unwrap().clone(), vec!["good:A"]);
    }

    #[tokio::test]
    async fn test_awaited_listeners_run_sequentially() {
        let bus = SignalBus::new("test");
        let log: Log = Arc::default();
        let a = SenderId::new();

        let slow_log = Arc::clone(&log);
        bus.connect(
            Signal::AgentStarted,
            listener_fn("slow", move |_e: SignalEvent| {
                let log = Arc::clone(&slow_log);
                async move {
                    log.lock().unwrap().push("slow:begin".to_string());
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    log.lock().unwrap().push("slow:end".to_string());
                    Ok(())
                }
            }),
            None,
        );
        bus.connect(Signal::AgentStarted, recorder("fast", &log), None);

        bus.send(&event(Signal::AgentStarted, a, "A")).await.unwrap();
        assert_eq!(log.lock().unwrap().clone(), vec!["slow:begin", "slow:end", "fast:A"]);
    }

    #[tokio::test]
    async fn test_detached_listener_is_not_awaited() {
        let bus = SignalBus::new("test");
        let a = SenderId::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<&'static str>(4);
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);

        let detached_tx = tx.clone();
        bus.connect_detached(
            Signal::AgentStarted,
            listener_fn("background", move |_e: SignalEvent| {
                let tx = detached_tx.clone();
                let mut release = release_rx.clone();
                async move {
                    let _ = release.wait_for(|r| *r).await;
                    let _ = tx.send("background").await;
                    Ok(())
                }
            }),
            None,
        );
        let awaited_tx = tx.clone();
        bus.connect(
            Signal::AgentStarted,
            listener_fn("foreground", move |_e: SignalEvent| {
                let tx = awaited_tx.clone();
                async move {
                    let _ = tx.send("foreground").await;
                    Ok(())
                }
            }),
            None,
        );

        let dispatched = bus.send(&event(Signal::AgentStarted, a, "A")).await.unwrap();
        assert_eq!(dispatched.awaited, 1);
        assert_eq!(dispatched.detached, 1);
        assert_eq!(rx.recv().await, Some("foreground"));

        release_tx.send(true).unwrap();
        assert_eq!(rx.recv().await, Some("background"));
    }

    #[tokio::test]
    async fn test_reentrant_send_does_not_deadlock() {
        let bus = Arc::new(SignalBus::new("test"));
        let log: Log = Arc::default();
        let a = SenderId::new();

        let inner_bus = Arc::clone(&bus);
        bus.connect(
            Signal::PartitionsRevoked,
            listener_fn("relay", move |e: SignalEvent| {
                let bus = Arc::clone(&inner_bus);
                async move {
                    bus.send(&SignalEvent::new(Signal::AgentStopped, e.sender, e.app_id, SignalPayload::Configured))
                        .await?;
                    Ok(())
                }
            }),
            None,
        );
        bus.connect(Signal::AgentStopped, recorder("sink", &log), None);

        let result = tokio::time::timeout(Duration::from_secs(1), bus.send(&event(Signal::PartitionsRevoked, a, "A")))
            .await
            .expect("re-entrant send deadlocked");
        assert!(result.is_ok());
        assert_eq!(log.lock().unwrap().clone(), vec!["sink:A"]);
    }

    #[tokio::test]
    async fn test_teardown_cancels_after_current_listener() {
        let bus = Arc::new(SignalBus::new("test"));
        let log: Log = Arc::default();
        let a = SenderId::new();

        let closing_bus = Arc::clone(&bus);
        let closing_log = Arc::clone(&log);
        bus.connect(
            Signal::AgentStopped,
            listener_fn("closer", move |_e: SignalEvent| {
                let bus = Arc::clone(&closing_bus);
                let log = Arc::clone(&closing_log);
                async move {
                    bus.teardown();
                    log.lock().unwrap().push("closer".to_string());
                    Ok(())
                }
            }),
            None,
        );
        bus.connect(Signal::AgentStopped, recorder("after", &log), None);

        let dispatched = bus.send(&event(Signal::AgentStopped, a, "A")).await.unwrap();
        assert!(dispatched.cancelled);
        assert_eq!(dispatched.awaited, 1);
        assert_eq!(log.lock().unwrap().clone(), vec!["closer"]);

        assert!(bus.is_closed());
        assert_eq!(bus.listener_count(Signal::AgentStopped), 0);
        let dispatched = bus.send(&event(Signal::AgentStopped, a, "A")).await.unwrap();
        assert_eq!(dispatched.awaited, 0);
    }

    #[tokio::test]
    async fn test_send_both_merges_failures() {
        let first = SignalBus::new("first");
        let second = SignalBus::new("second");
        let log: Log = Arc::default();
        let a = SenderId::new();

        first.connect(Signal::AgentStarted, failing("one"), Some(a));
        second.connect(Signal::AgentStarted, recorder("two", &log), None);
        second.connect(Signal::AgentStarted, failing("three"), None);

        let err = send_both(&first, &second, &event(Signal::AgentStarted, a, "A"))
            .await
            .unwrap_err();
        assert_eq!(err.listeners(), vec!["one", "three"]);
        assert_eq!(log.lock().unwrap().clone(), vec!["two:A"]);
    }
}
