//! Listener trait and closure adapter

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::types::SignalEvent;

/// Something that reacts to signal occurrences
///
/// The name identifies the listener inside the bus: connecting a second
/// listener with the same name to the same signal and sender filter
/// replaces the first.
#[async_trait]
pub trait Listener: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &SignalEvent) -> eyre::Result<()>;
}

/// Adapts an async closure into a [`Listener`]
pub struct FnListener<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Listener for FnListener<F>
where
    F: Fn(SignalEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &SignalEvent) -> eyre::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// Wrap `f` as a named listener ready to connect
pub fn listener_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Listener>
where
    F: Fn(SignalEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    Arc::new(FnListener { name: name.into(), f })
}
