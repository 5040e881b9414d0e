//! Span backend - external tracing of rebalance spans

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{Span, debug, info, info_span};

/// Tags attached to a backend span
pub type SpanTags = BTreeMap<String, String>;

/// Opaque handle to a span opened by a [`SpanBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanToken(pub u64);

/// Tracing collaborator keyed by the rebalance span lifecycle
pub trait SpanBackend: Send + Sync {
    fn start_span(&self, name: &str, tags: &SpanTags) -> SpanToken;

    fn finish_span(&self, token: SpanToken, tags: &SpanTags);
}

/// Backend that maps rebalance spans onto `tracing` spans
#[derive(Default)]
pub struct TracingSpanBackend {
    open: Mutex<HashMap<SpanToken, Span>>,
    next: AtomicU64,
}

impl TracingSpanBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans started and not yet finished
    pub fn open_count(&self) -> usize {
        self.open.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl SpanBackend for TracingSpanBackend {
    fn start_span(&self, name: &str, tags: &SpanTags) -> SpanToken {
        let token = SpanToken(self.next.fetch_add(1, Ordering::Relaxed));
        let span = info_span!("rebalance", name = %name, tags = ?tags);
        debug!(?token, %name, "TracingSpanBackend::start_span: called");
        self.open.lock().unwrap_or_else(|e| e.into_inner()).insert(token, span);
        token
    }

    fn finish_span(&self, token: SpanToken, tags: &SpanTags) {
        let span = self.open.lock().unwrap_or_else(|e| e.into_inner()).remove(&token);
        match span {
            Some(span) => span.in_scope(|| info!(?tags, "rebalance span finished")),
            None => debug!(?token, "TracingSpanBackend::finish_span: unknown token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_and_finish() {
        let backend = TracingSpanBackend::new();
        let tags = SpanTags::from([("app_id".to_string(), "orders".to_string())]);

        let a = backend.start_span("rebalance", &tags);
        let b = backend.start_span("rebalance", &tags);
        assert_ne!(a, b);
        assert_eq!(backend.open_count(), 2);

        backend.finish_span(a, &tags);
        assert_eq!(backend.open_count(), 1);

        // Finishing twice is harmless
        backend.finish_span(a, &tags);
        assert_eq!(backend.open_count(), 1);
    }
}
