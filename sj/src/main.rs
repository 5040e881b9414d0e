//! sj - streamjobs inspection CLI
//!
//! Builds topic descriptions and shows the resolved configuration.

use std::fs;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use streamjobs::cli::{Cli, Command, OutputFormat, get_log_path};
use streamjobs::config::Config;
use streamjobs::topic::{Retention, TopicOptions, TopicSources, build};

fn setup_logging(verbose: bool) {
    // Note: Can't log params here since logging isn't initialized yet
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let log_path = get_log_path();
    let log_file = log_path
        .parent()
        .map(fs::create_dir_all)
        .transpose()
        .and_then(|_| fs::File::create(&log_path));

    match log_file {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
            tracing::warn!(path = %log_path.display(), error = %e, "Log file unavailable, logging to stderr");
        }
    }

    info!("Logging initialized (level: {:?})", level);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Topic {
            names,
            pattern,
            partitions,
            replicas,
            retention,
            compacting,
            deleting,
            internal,
            allow_empty,
            format,
        } => {
            let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
            let sources = TopicSources { topics: names, pattern };
            let options = TopicOptions {
                partitions,
                replicas,
                retention: retention.map(Retention::Secs),
                compacting: compacting.then_some(true),
                deleting: deleting.then_some(true),
                internal,
                allow_empty,
                ..Default::default()
            };
            cmd_topic(&config, sources, options, format)
        }
        Command::Config { format } => {
            let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
            cmd_config(&config, format)
        }
    }
}

fn cmd_topic(config: &Config, sources: TopicSources, options: TopicOptions, format: OutputFormat) -> Result<()> {
    debug!(?sources, "cmd_topic: called");
    let descriptor = build(sources, options).context("Invalid topic description")?;
    let requests = descriptor.creation_requests(&config.topics);

    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "descriptor": descriptor,
                "creation_requests": requests,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Topic: {}", descriptor);
            if let Some(n) = descriptor.partitions() {
                println!("  partitions: {}", n);
            }
            if let Some(n) = descriptor.replicas() {
                println!("  replicas: {}", n);
            }
            if let Some(retention) = descriptor.retention() {
                println!("  retention: {:?}", retention);
            }
            println!("  internal: {}", descriptor.internal());
            if requests.is_empty() {
                println!("No topics to create");
            }
            for request in &requests {
                println!(
                    "Create {} (partitions={}, replicas={})",
                    request.topic, request.partitions, request.replicas
                );
                for (key, value) in &request.config {
                    println!("  {} = {}", key, value);
                }
            }
        }
    }
    Ok(())
}

fn cmd_config(config: &Config, format: OutputFormat) -> Result<()> {
    debug!("cmd_config: called");
    config.validate()?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", serde_yaml::to_string(config)?),
    }
    Ok(())
}
