//! TopicDescriptor - immutable, validated topic configuration
//!
//! Descriptors are built on demand by callers (agents, application code)
//! before any broker I/O happens. Building is pure: nothing is cached and
//! the broker is never contacted, so two builds from identical input give
//! equal but distinct descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::ConfigError;

/// Where a descriptor reads from / writes to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSources {
    pub topics: Vec<String>,
    pub pattern: Option<String>,
}

/// Retention as given by the caller
///
/// `Exact` is taken as is. `Secs` is raw user input and must be finite,
/// non-negative and representable as a `Duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Retention {
    Exact(Duration),
    Secs(f64),
}

impl Retention {
    fn resolve(self) -> Result<Duration, ConfigError> {
        match self {
            Retention::Exact(duration) => Ok(duration),
            Retention::Secs(secs) => Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidRetention(secs)),
        }
    }
}

/// Every option a topic descriptor carries besides its sources
#[derive(Debug, Clone, PartialEq)]
pub struct TopicOptions {
    pub key_type: Option<String>,
    pub value_type: Option<String>,
    pub key_serializer: Option<String>,
    pub value_serializer: Option<String>,
    /// `None` means "use the configured default"
    pub partitions: Option<u32>,
    pub replicas: Option<u32>,
    pub retention: Option<Retention>,
    pub compacting: Option<bool>,
    pub deleting: Option<bool>,
    /// Require broker acknowledgement
    pub acks: bool,
    /// The coordinator may create and manage this topic
    pub internal: bool,
    /// Broker config overrides
    pub config: BTreeMap<String, String>,
    pub maxsize: Option<usize>,
    /// Zero-message bursts are a valid steady state
    pub allow_empty: bool,
}

impl Default for TopicOptions {
    fn default() -> Self {
        Self {
            key_type: None,
            value_type: None,
            key_serializer: None,
            value_serializer: None,
            partitions: None,
            replicas: None,
            retention: None,
            compacting: None,
            deleting: None,
            acks: true,
            internal: false,
            config: BTreeMap::new(),
            maxsize: None,
            allow_empty: false,
        }
    }
}

/// A compiled topic pattern, compared by its source text
#[derive(Debug, Clone)]
pub struct TopicPattern {
    source: String,
    anchored: Regex,
}

impl TopicPattern {
    fn compile(source: &str) -> Result<Self, ConfigError> {
        let anchored = Regex::new(&format!("^(?:{})$", source)).map_err(|e| ConfigError::InvalidPattern {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            anchored,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the whole topic name matches
    pub fn is_match(&self, topic: &str) -> bool {
        self.anchored.is_match(topic)
    }
}

impl PartialEq for TopicPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for TopicPattern {}

impl Serialize for TopicPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Immutable description of a named, partitioned channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicDescriptor {
    topics: Vec<String>,
    pattern: Option<TopicPattern>,
    key_type: Option<String>,
    value_type: Option<String>,
    key_serializer: Option<String>,
    value_serializer: Option<String>,
    partitions: Option<u32>,
    replicas: Option<u32>,
    retention: Option<Duration>,
    compacting: Option<bool>,
    deleting: Option<bool>,
    acks: bool,
    internal: bool,
    config: BTreeMap<String, String>,
    maxsize: Option<usize>,
    allow_empty: bool,
}

/// Validate sources and options and construct a descriptor
///
/// Rules are checked in order and the first failure wins:
/// mutual exclusion, destination presence, partitions, replicas,
/// retention, then pattern compilation.
pub fn build(sources: TopicSources, options: TopicOptions) -> Result<TopicDescriptor, ConfigError> {
    debug!(
        topics = ?sources.topics,
        pattern = ?sources.pattern,
        allow_empty = options.allow_empty,
        "topic::build: called"
    );

    // Empty names and an empty pattern count as absent
    let mut topics = sources.topics;
    topics.retain(|t| !t.is_empty());
    let pattern = sources.pattern.filter(|p| !p.is_empty());

    let has_topics = !topics.is_empty();
    let has_pattern = pattern.is_some();

    if has_topics && has_pattern {
        return Err(ConfigError::MutuallyExclusive);
    }
    if !has_topics && !has_pattern && !options.allow_empty {
        return Err(ConfigError::NoDestination);
    }
    if let Some(0) = options.partitions {
        return Err(ConfigError::InvalidPartitions(0));
    }
    if let Some(0) = options.replicas {
        return Err(ConfigError::InvalidReplicas(0));
    }
    let retention = options.retention.map(Retention::resolve).transpose()?;
    let pattern = pattern.as_deref().map(TopicPattern::compile).transpose()?;

    debug!("topic::build: descriptor valid");
    Ok(TopicDescriptor {
        topics,
        pattern,
        key_type: options.key_type,
        value_type: options.value_type,
        key_serializer: options.key_serializer,
        value_serializer: options.value_serializer,
        partitions: options.partitions,
        replicas: options.replicas,
        retention,
        compacting: options.compacting,
        deleting: options.deleting,
        acks: options.acks,
        internal: options.internal,
        config: options.config,
        maxsize: options.maxsize,
        allow_empty: options.allow_empty,
    })
}

impl TopicDescriptor {
    /// Start a fluent builder
    pub fn builder() -> TopicBuilder {
        TopicBuilder::default()
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn pattern(&self) -> Option<&TopicPattern> {
        self.pattern.as_ref()
    }

    pub fn key_type(&self) -> Option<&str> {
        self.key_type.as_deref()
    }

    pub fn value_type(&self) -> Option<&str> {
        self.value_type.as_deref()
    }

    pub fn key_serializer(&self) -> Option<&str> {
        self.key_serializer.as_deref()
    }

    pub fn value_serializer(&self) -> Option<&str> {
        self.value_serializer.as_deref()
    }

    pub fn partitions(&self) -> Option<u32> {
        self.partitions
    }

    pub fn replicas(&self) -> Option<u32> {
        self.replicas
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    pub fn compacting(&self) -> Option<bool> {
        self.compacting
    }

    pub fn deleting(&self) -> Option<bool> {
        self.deleting
    }

    pub fn acks(&self) -> bool {
        self.acks
    }

    pub fn internal(&self) -> bool {
        self.internal
    }

    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    pub fn maxsize(&self) -> Option<usize> {
        self.maxsize
    }

    pub fn allow_empty(&self) -> bool {
        self.allow_empty
    }

    /// Whether a concrete topic name belongs to this descriptor
    pub fn matches(&self, topic: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.is_match(topic),
            None => self.topics.iter().any(|t| t == topic),
        }
    }

    /// A builder prefilled with this descriptor, for building a variant
    pub fn derive(&self) -> TopicBuilder {
        debug!(topics = ?self.topics, "TopicDescriptor::derive: called");
        TopicBuilder {
            sources: TopicSources {
                topics: self.topics.clone(),
                pattern: self.pattern.as_ref().map(|p| p.source.clone()),
            },
            options: TopicOptions {
                key_type: self.key_type.clone(),
                value_type: self.value_type.clone(),
                key_serializer: self.key_serializer.clone(),
                value_serializer: self.value_serializer.clone(),
                partitions: self.partitions,
                replicas: self.replicas,
                retention: self.retention.map(Retention::Exact),
                compacting: self.compacting,
                deleting: self.deleting,
                acks: self.acks,
                internal: self.internal,
                config: self.config.clone(),
                maxsize: self.maxsize,
                allow_empty: self.allow_empty,
            },
        }
    }
}

impl fmt::Display for TopicDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pattern {
            Some(pattern) => write!(f, "<pattern: {}>", pattern),
            None if self.topics.is_empty() => write!(f, "<empty>"),
            None => write!(f, "{}", self.topics.join(",")),
        }
    }
}

/// Fluent front end for [`build`]
#[derive(Debug, Clone, Default)]
pub struct TopicBuilder {
    sources: TopicSources,
    options: TopicOptions,
}

impl TopicBuilder {
    pub fn topic(mut self, name: impl Into<String>) -> Self {
        self.sources.topics.push(name.into());
        self
    }

    pub fn topics<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources.topics.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.sources.pattern = Some(pattern.into());
        self
    }

    pub fn key_type(mut self, key_type: impl Into<String>) -> Self {
        self.options.key_type = Some(key_type.into());
        self
    }

    pub fn value_type(mut self, value_type: impl Into<String>) -> Self {
        self.options.value_type = Some(value_type.into());
        self
    }

    pub fn key_serializer(mut self, codec: impl Into<String>) -> Self {
        self.options.key_serializer = Some(codec.into());
        self
    }

    pub fn value_serializer(mut self, codec: impl Into<String>) -> Self {
        self.options.value_serializer = Some(codec.into());
        self
    }

    pub fn partitions(mut self, partitions: u32) -> Self {
        self.options.partitions = Some(partitions);
        self
    }

    pub fn replicas(mut self, replicas: u32) -> Self {
        self.options.replicas = Some(replicas);
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.options.retention = Some(Retention::Exact(retention));
        self
    }

    pub fn retention_secs(mut self, secs: f64) -> Self {
        self.options.retention = Some(Retention::Secs(secs));
        self
    }

    pub fn compacting(mut self, compacting: bool) -> Self {
        self.options.compacting = Some(compacting);
        self
    }

    pub fn deleting(mut self, deleting: bool) -> Self {
        self.options.deleting = Some(deleting);
        self
    }

    pub fn acks(mut self, acks: bool) -> Self {
        self.options.acks = acks;
        self
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.options.internal = internal;
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.config.insert(key.into(), value.into());
        self
    }

    pub fn maxsize(mut self, maxsize: usize) -> Self {
        self.options.maxsize = Some(maxsize);
        self
    }

    pub fn allow_empty(mut self, allow_empty: bool) -> Self {
        self.options.allow_empty = allow_empty;
        self
    }

    /// Replace all options at once
    pub fn options(mut self, options: TopicOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<TopicDescriptor, ConfigError> {
        build(self.sources, self.options)
    }
}
