//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// streamjobs - inspect topic descriptions and configuration
#[derive(Parser)]
#[command(
    name = "sj",
    about = "Orchestration core for partitioned stream-processing agents",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log at DEBUG instead of INFO
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build a topic description and show what it resolves to
    Topic {
        /// Concrete topic names
        #[arg(value_name = "NAMES")]
        names: Vec<String>,

        /// Subscribe by regular expression instead of names
        #[arg(short, long)]
        pattern: Option<String>,

        /// Partition count
        #[arg(long)]
        partitions: Option<u32>,

        /// Replication factor
        #[arg(long)]
        replicas: Option<u32>,

        /// Retention in seconds
        #[arg(long, allow_negative_numbers = true)]
        retention: Option<f64>,

        /// Enable log compaction
        #[arg(long)]
        compacting: bool,

        /// Enable deletion
        #[arg(long)]
        deleting: bool,

        /// Managed by the application (creation requests are produced)
        #[arg(long)]
        internal: bool,

        /// Allow neither names nor pattern
        #[arg(long)]
        allow_empty: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the resolved configuration
    Config {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for inspection commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

/// Location of the log file written by `sj`
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("streamjobs")
        .join("logs")
        .join("sj.log")
}
