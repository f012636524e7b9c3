//! Configuration parsing for mirra
//!
//! This crate handles parsing and validation of `mirra.toml`: the storage
//! root, the uplink registries and the ordered package access rules.

pub mod loader;
pub mod model;

// Re-export main types
pub use loader::{apply_env_overrides, discover_config_path, load_from_file, parse_config};
pub use model::{Config, PackageRule, UplinkConfig};

use mirra_core::error::MirraError;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, MirraError>;
