//! Topic-creation requests for internal topics
//!
//! The broker collaborator consumes these; nothing here talks to a broker.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::descriptor::TopicDescriptor;
use crate::config::TopicsConfig;

/// One topic the coordinator wants the broker to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicCreation {
    pub topic: String,
    pub partitions: u32,
    pub replicas: u32,
    pub config: BTreeMap<String, String>,
}

impl TopicDescriptor {
    /// Creation requests for this descriptor, resolved against `defaults`
    ///
    /// Only internal descriptors with concrete names produce requests.
    /// Explicit broker config overrides win over derived keys.
    pub fn creation_requests(&self, defaults: &TopicsConfig) -> Vec<TopicCreation> {
        if !self.internal() || self.pattern().is_some() {
            debug!(topic = %self, internal = self.internal(), "creation_requests: nothing to create");
            return Vec::new();
        }

        let mut config = BTreeMap::new();
        if let Some(retention) = self.retention() {
            config.insert("retention.ms".to_string(), retention.as_millis().to_string());
        }
        let policy = match (self.compacting().unwrap_or(false), self.deleting().unwrap_or(false)) {
            (true, true) => Some("compact,delete"),
            (true, false) => Some("compact"),
            (false, true) => Some("delete"),
            (false, false) => None,
        };
        if let Some(policy) = policy {
            config.insert("cleanup.policy".to_string(), policy.to_string());
        }
        for (key, value) in self.config() {
            config.insert(key.clone(), value.clone());
        }

        let partitions = self.partitions().unwrap_or(defaults.default_partitions);
        let replicas = self.replicas().unwrap_or(defaults.replication_factor);

        self.topics()
            .iter()
            .map(|topic| TopicCreation {
                topic: topic.clone(),
                partitions,
                replicas,
                config: config.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_non_internal_topics_are_not_created() {
        let desc = TopicDescriptor::builder().topic("orders").build().unwrap();
        assert!(desc.creation_requests(&TopicsConfig::default()).is_empty());
    }

    #[test]
    fn test_pattern_topics_are_not_created() {
        let desc = TopicDescriptor::builder().pattern("orders-.*").internal(true).build().unwrap();
        assert!(desc.creation_requests(&TopicsConfig::default()).is_empty());
    }

    #[test]
    fn test_defaults_fill_unset_partitions_and_replicas() {
        let desc = TopicDescriptor::builder().topics(["a", "b"]).internal(true).build().unwrap();
        let defaults = TopicsConfig {
            default_partitions: 12,
            replication_factor: 3,
        };

        let requests = desc.creation_requests(&defaults);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].topic, "a");
        assert_eq!(requests[1].topic, "b");
        assert!(requests.iter().all(|r| r.partitions == 12 && r.replicas == 3));
        assert!(requests[0].config.is_empty());
    }

    #[test]
    fn test_retention_and_cleanup_policy() {
        let desc = TopicDescriptor::builder()
            .topic("changelog")
            .internal(true)
            .partitions(4)
            .retention(Duration::from_secs(2))
            .compacting(true)
            .deleting(true)
            .build()
            .unwrap();

        let requests = desc.creation_requests(&TopicsConfig::default());
        assert_eq!(requests[0].partitions, 4);
        assert_eq!(requests[0].config["retention.ms"], "2000");
        assert_eq!(requests[0].config["cleanup.policy"], "compact,delete");
    }

    #[test]
    fn test_explicit_overrides_win() {
        let desc = TopicDescriptor::builder()
            .topic("changelog")
            .internal(true)
            .compacting(true)
            .config("cleanup.policy", "delete")
            .build()
            .unwrap();

        let requests = desc.creation_requests(&TopicsConfig::default());
        assert_eq!(requests[0].config["cleanup.policy"], "delete");
    }
}
