//! # mirra-cli
//!
//! Command line front end of the mirra registry proxy.
//!
//! Loads `mirra.toml`, sets up logging and drives the storage handler for
//! operator tasks: validating configuration, syncing package metadata,
//! fetching tarballs and inspecting package routing.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::CommandContext;
use output::OutputHandler;

/// Caching proxy for npm-compatible package registries
#[derive(Parser, Debug)]
#[command(name = "mirra", version, about = "Caching proxy for npm-compatible registries")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./mirra.toml, then the user config directory)
    #[arg(short, long, global = true, env = "MIRRA_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Validate the configuration and list uplinks and package rules
    Check,
    /// Sync a package with its uplinks and print the merged metadata
    Metadata {
        package: String,
        /// Query uplinks even if the stored metadata is still fresh
        #[arg(long)]
        refresh: bool,
        /// Only read local storage
        #[arg(long, conflicts_with = "refresh")]
        offline: bool,
    },
    /// Download a tarball through the proxy
    Tarball {
        package: String,
        filename: String,
        /// Output file (defaults to the filename in the current directory)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Show which rule and uplinks apply to a package
    Resolve { package: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_format);
    info!("Starting mirra v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    let result = runtime.block_on(async {
        let ctx = CommandContext::new(cli.config.as_deref()).await?;
        commands::dispatch_command(cli.command, &ctx).await
    });

    if let Err(e) = result {
        error!("Command failed: {}", e);
        eprintln!("{}", OutputHandler::new().format_error(&e));
        std::process::exit(1);
    }
    Ok(())
}

fn setup_logging(verbose: bool, format: LogFormat) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "mirra={level},mirra_storage={level},mirra_uplink={level},mirra_store={level},mirra_config={level}",
            level = level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata_command() {
        let cli = Cli::try_parse_from(["mirra", "metadata", "@jquery/jquery", "--refresh"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Metadata {
                package: "@jquery/jquery".to_string(),
                refresh: true,
                offline: false,
            }
        );
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mirra",
            "tarball",
            "jquery",
            "jquery-1.5.1.tgz",
            "-o",
            "out.tgz",
            "--config",
            "custom.toml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Tarball { output: Some(_), .. }));
    }

    #[test]
    fn test_refresh_conflicts_with_offline() {
        assert!(Cli::try_parse_from(["mirra", "metadata", "jquery", "--refresh", "--offline"]).is_err());
    }
}
