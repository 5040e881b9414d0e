//! streamjobs configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main streamjobs configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application-wide settings
    pub app: AppConfig,

    /// Agent lifecycle timeouts
    pub agents: AgentsConfig,

    /// Defaults applied to internal topics
    pub topics: TopicsConfig,

    /// Rebalance tracing
    pub rebalance: RebalanceConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.topics.default_partitions == 0 {
            return Err(eyre::eyre!("topics.default-partitions must be at least 1"));
        }
        if self.topics.replication_factor == 0 {
            return Err(eyre::eyre!("topics.replication-factor must be at least 1"));
        }
        if self.agents.hard_timeout_ms < self.agents.shutdown_grace_ms {
            return Err(eyre::eyre!(
                "agents.hard-timeout-ms ({}) must not be shorter than agents.shutdown-grace-ms ({})",
                self.agents.hard_timeout_ms,
                self.agents.shutdown_grace_ms
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: ./streamjobs.yml
        let local_config = PathBuf::from("streamjobs.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/streamjobs/streamjobs.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("streamjobs").join("streamjobs.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Application-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Run registered discovery hooks before handing off to the bootstrap
    pub autodiscover: bool,

    /// Broker URL handed to the transport collaborator
    pub broker: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            autodiscover: false,
            broker: "kafka://localhost:9092".to_string(),
        }
    }
}

/// Agent lifecycle timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// How long stop_all waits for agents to acknowledge a stop request
    #[serde(rename = "shutdown-grace-ms")]
    pub shutdown_grace_ms: u64,

    /// Upper bound for the whole shutdown, forced cancellation included
    #[serde(rename = "hard-timeout-ms")]
    pub hard_timeout_ms: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 10_000,
            hard_timeout_ms: 30_000,
        }
    }
}

impl AgentsConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }
}

/// Defaults applied when creating internal topics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    /// Partition count for descriptors that leave partitions unset
    #[serde(rename = "default-partitions")]
    pub default_partitions: u32,

    /// Replication factor for descriptors that leave replicas unset
    #[serde(rename = "replication-factor")]
    pub replication_factor: u32,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            default_partitions: 8,
            replication_factor: 1,
        }
    }
}

/// Rebalance tracing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Number of closed spans kept in memory for introspection
    #[serde(rename = "span-history")]
    pub span_history: usize,

    /// Forward span lifecycle to the tracing backend when one is attached
    #[serde(rename = "trace-spans")]
    pub trace_spans: bool,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            span_history: 32,
            trace_spans: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(!config.app.autodiscover);
        assert_eq!(config.app.broker, "kafka://localhost:9092");
        assert_eq!(config.agents.shutdown_grace_ms, 10_000);
        assert_eq!(config.topics.default_partitions, 8);
        assert_eq!(config.rebalance.span_history, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
app:
  autodiscover: true
  broker: kafka://broker-1:9092

agents:
  shutdown-grace-ms: 500
  hard-timeout-ms: 2000

topics:
  default-partitions: 12
  replication-factor: 3

rebalance:
  span-history: 4
  trace-spans: false
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert!(config.app.autodiscover);
        assert_eq!(config.app.broker, "kafka://broker-1:9092");
        assert_eq!(config.agents.shutdown_grace(), Duration::from_millis(500));
        assert_eq!(config.agents.hard_timeout(), Duration::from_secs(2));
        assert_eq!(config.topics.default_partitions, 12);
        assert_eq!(config.topics.replication_factor, 3);
        assert_eq!(config.rebalance.span_history, 4);
        assert!(!config.rebalance.trace_spans);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
topics:
  default-partitions: 3
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.topics.default_partitions, 3);
        assert_eq!(config.topics.replication_factor, 1);
        assert_eq!(config.agents.hard_timeout_ms, 30_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.topics.default_partitions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.topics.replication_factor = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.agents.shutdown_grace_ms = 5_000;
        config.agents.hard_timeout_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "agents:\n  shutdown-grace-ms: 250\n").unwrap();

        let path = file.path().to_path_buf();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.agents.shutdown_grace_ms, 250);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/streamjobs.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
