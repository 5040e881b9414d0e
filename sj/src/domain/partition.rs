//! Topic partitions and partition assignments

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One partition of one topic
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// An ordered set of partitions handed over by the broker during a rebalance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignment(BTreeSet<TopicPartition>);

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tp: TopicPartition) -> bool {
        self.0.insert(tp)
    }

    pub fn remove(&mut self, tp: &TopicPartition) -> bool {
        self.0.remove(tp)
    }

    pub fn contains(&self, tp: &TopicPartition) -> bool {
        self.0.contains(tp)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicPartition> {
        self.0.iter()
    }

    /// Distinct topic names in this assignment
    pub fn topics(&self) -> BTreeSet<&str> {
        self.0.iter().map(|tp| tp.topic.as_str()).collect()
    }

    /// Subset whose topic satisfies `pred`
    pub fn filter_topics(&self, mut pred: impl FnMut(&str) -> bool) -> Assignment {
        Self(self.0.iter().filter(|tp| pred(&tp.topic)).cloned().collect())
    }

    pub fn union(&self, other: &Assignment) -> Assignment {
        Self(self.0.union(&other.0).cloned().collect())
    }

    pub fn difference(&self, other: &Assignment) -> Assignment {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    /// Add every partition of `other` in place
    pub fn extend_from(&mut self, other: &Assignment) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Remove every partition of `other` in place
    pub fn remove_all(&mut self, other: &Assignment) {
        for tp in other.iter() {
            self.0.remove(tp);
        }
    }
}

impl FromIterator<TopicPartition> for Assignment {
    fn from_iter<I: IntoIterator<Item = TopicPartition>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Assignment {
    type Item = &'a TopicPartition;
    type IntoIter = std::collections::btree_set::Iter<'a, TopicPartition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|tp| tp.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}
