//! Command implementations and dispatch logic.
//!
//! Each command is an async function taking the shared [`CommandContext`].

use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use mirra_config::{discover_config_path, load_from_file, Config};
use mirra_core::error::{MirraError, MirraResult};
use mirra_storage::StorageHandler;
use tracing::{debug, info};

pub mod check;
pub mod metadata;
pub mod resolve;
pub mod tarball;


use crate::output::OutputHandler;
use crate::Commands;

/// Shared context for all commands
pub struct CommandContext {
    pub cwd: PathBuf,
    pub config_path: Utf8PathBuf,
    pub config: Config,
    pub output: OutputHandler,
}

fn utf8(path: &Path) -> MirraResult<&Utf8Path> {
    Utf8Path::from_path(path).ok_or_else(|| MirraError::ConfigValidation {
        field: "path".to_string(),
        reason: format!("{} is not valid UTF-8", path.display()),
    })
}

impl CommandContext {
    /// Locate and load the configuration
    pub async fn new(explicit_config: Option<&Path>) -> MirraResult<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| MirraError::io("Failed to get current directory".to_string(), e))?;
        Self::load(cwd, explicit_config, OutputHandler::new()).await
    }

    /// Load the configuration relative to `cwd`
    pub async fn load(cwd: PathBuf, explicit_config: Option<&Path>, output: OutputHandler) -> MirraResult<Self> {
        let explicit = explicit_config.map(utf8).transpose()?;
        let config_path = discover_config_path(explicit, utf8(&cwd)?)?;
        debug!("Using configuration {}", config_path);

        let config = load_from_file(&config_path).await?;
        Ok(Self {
            cwd,
            config_path,
            config,
            output,
        })
    }

    /// Initialize a storage handler from the loaded configuration
    pub async fn handler(&self) -> MirraResult<StorageHandler> {
        StorageHandler::from_config(&self.config, Vec::new()).await
    }
}

/// Dispatch a command to its handler
pub async fn dispatch_command(command: Commands, ctx: &CommandContext) -> MirraResult<()> {
    match command {
        Commands::Check => {
            info!("Checking configuration {}", ctx.config_path);
            check::execute(ctx).await
        },
        Commands::Metadata {
            package,
            refresh,
            offline,
        } => {
            info!("Syncing metadata of {} (refresh: {}, offline: {})", package, refresh, offline);
            metadata::execute(&package, refresh, offline, ctx).await
        },
        Commands::Tarball {
            package,
            filename,
            output,
        } => {
            info!("Fetching tarball {} of {}", filename, package);
            tarball::execute(&package, &filename, output, ctx).await
        },
        Commands::Resolve { package } => {
            info!("Resolving uplinks of {}", package);
            resolve::execute(&package, ctx).await
        },
    }
}
