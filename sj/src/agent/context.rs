//! AgentContext - what a running agent can observe

use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use super::types::AgentHandle;
use crate::domain::{Assignment, TopicPartition};
use crate::rebalance::Sensors;
use crate::topic::TopicDescriptor;

/// Handed to an agent's `on_start` and `run`
///
/// Ownership reflects the application's current assignment narrowed to the
/// agent's topic. The manager removes revoked partitions before any revoke
/// hook runs, so checking [`owns`](Self::owns) before processing a message
/// is enough to never touch a partition that has moved away.
#[derive(Clone)]
pub struct AgentContext {
    handle: AgentHandle,
    topic: Option<TopicDescriptor>,
    stop_rx: watch::Receiver<bool>,
    owned: Arc<RwLock<Assignment>>,
    sensors: Arc<Sensors>,
}

impl AgentContext {
    pub(crate) fn new(
        handle: AgentHandle,
        topic: Option<TopicDescriptor>,
        stop_rx: watch::Receiver<bool>,
        owned: Arc<RwLock<Assignment>>,
        sensors: Arc<Sensors>,
    ) -> Self {
        Self {
            handle,
            topic,
            stop_rx,
            owned,
            sensors,
        }
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn sensors(&self) -> &Sensors {
        &self.sensors
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Resolves once a stop has been requested
    ///
    /// Also resolves if the manager has gone away.
    pub async fn stopped(&self) {
        let mut rx = self.stop_rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Whether this agent may process messages from `tp` right now
    pub fn owns(&self, tp: &TopicPartition) -> bool {
        if let Some(topic) = &self.topic
            && !topic.matches(&tp.topic)
        {
            return false;
        }
        self.owned.read().unwrap_or_else(|e| e.into_inner()).contains(tp)
    }

    pub fn owned_partitions(&self) -> Assignment {
        let owned = self.owned.read().unwrap_or_else(|e| e.into_inner());
        match &self.topic {
            Some(topic) => owned.filter_topics(|t| topic.matches(t)),
            None => owned.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn context(topic: Option<TopicDescriptor>) -> (AgentContext, watch::Sender<bool>, Arc<RwLock<Assignment>>) {
        let (tx, rx) = watch::channel(false);
        let owned = Arc::new(RwLock::new(Assignment::new()));
        let handle = AgentHandle {
            index: 0,
            name: "counter".into(),
            app_id: "app".into(),
        };
        let ctx = AgentContext::new(handle, topic, rx, Arc::clone(&owned), Arc::new(Sensors::new()));
        (ctx, tx, owned)
    }

    #[tokio::test]
    async fn test_stop_request() {
        let (ctx, tx, _) = context(None);
        assert!(!ctx.is_stop_requested());

        let waiter = ctx.clone();
        let task = tokio::spawn(async move { waiter.stopped().await });
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(ctx.is_stop_requested());
    }

    #[tokio::test]
    async fn test_stopped_when_sender_dropped() {
        let (ctx, tx, _) = context(None);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), ctx.stopped()).await.unwrap();
    }

    #[test]
    fn test_ownership_narrowed_to_topic() {
        let topic = TopicDescriptor::builder().topic("orders").build().unwrap();
        let (ctx, _tx, owned) = context(Some(topic));
        {
            let mut owned = owned.write().unwrap();
            owned.insert(TopicPartition::new("orders", 0));
            owned.insert(TopicPartition::new("payments", 0));
        }

        assert!(ctx.owns(&TopicPartition::new("orders", 0)));
        assert!(!ctx.owns(&TopicPartition::new("payments", 0)));
        assert_eq!(ctx.owned_partitions().len(), 1);

        owned.write().unwrap().remove(&TopicPartition::new("orders", 0));
        assert!(!ctx.owns(&TopicPartition::new("orders", 0)));
    }
}
