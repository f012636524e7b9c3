//! Loading, validation and environment overrides

use camino::{Utf8Path, Utf8PathBuf};
use mirra_core::error::MirraError;
use tracing::debug;
use url::Url;

use crate::{model::Config, ConfigResult};

const CONFIG_FILE: &str = "mirra.toml";

/// Parse a TOML string into a validated configuration
pub fn parse_config(content: &str) -> ConfigResult<Config> {
    let config: Config = toml::from_str(content).map_err(|e| MirraError::ConfigParse {
        message: format!("TOML parsing error: {}", e),
    })?;

    validate_config(&config)?;

    Ok(config)
}

/// Load and parse a configuration file, then apply environment overrides.
///
/// A relative `storage` path is resolved against the directory of the file.
pub async fn load_from_file(path: &Utf8Path) -> ConfigResult<Config> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| MirraError::io(format!("Failed to read {}", path), e))?;

    let mut config = parse_config(&content).map_err(|e| match e {
        MirraError::ConfigParse { message } => MirraError::ConfigParse {
            message: format!("In file {}: {}", path, message),
        },
        MirraError::ConfigValidation { field, reason } => MirraError::ConfigValidation {
            field,
            reason: format!("In file {}: {}", path, reason),
        },
        other => other,
    })?;

    if config.storage.is_relative() {
        if let Some(dir) = path.parent() {
            config.storage = dir.join(&config.storage);
        }
    }

    apply_env_overrides(&mut config, std::env::vars())?;
    debug!("Loaded configuration from {}", path);

    Ok(config)
}

/// Validate configuration completeness
pub fn validate_config(config: &Config) -> ConfigResult<()> {
    if config.storage.as_str().is_empty() {
        return Err(MirraError::ConfigValidation {
            field: "storage".to_string(),
            reason: "storage path is required".to_string(),
        });
    }

    for (name, uplink) in &config.uplinks {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(MirraError::ConfigValidation {
                field: format!("uplinks.{}", name),
                reason: "uplink names must be non-empty and contain no whitespace".to_string(),
            });
        }
        validate_url(&format!("uplinks.{}.url", name), &uplink.url)?;
        if uplink.timeout.is_zero() {
            return Err(MirraError::ConfigValidation {
                field: format!("uplinks.{}.timeout", name),
                reason: "timeout must be greater than zero".to_string(),
            });
        }
    }

    for pattern in config.packages.keys() {
        glob::Pattern::new(pattern).map_err(|e| MirraError::ConfigValidation {
            field: format!("packages.{}", pattern),
            reason: format!("invalid package pattern: {}", e),
        })?;
    }

    Ok(())
}

fn validate_url(field: &str, value: &str) -> ConfigResult<()> {
    let url = Url::parse(value).map_err(|e| MirraError::ConfigValidation {
        field: field.to_string(),
        reason: format!("invalid url '{}': {}", value, e),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(MirraError::ConfigValidation {
            field: field.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    Ok(())
}

/// Apply `MIRRA_*` environment overrides.
///
/// - `MIRRA_STORAGE` replaces the storage path
/// - `MIRRA_UPLINK_<NAME>_URL` replaces the url of uplink `<name>`
///   (name matched case-insensitively, `-` written as `_`)
pub fn apply_env_overrides<I>(config: &mut Config, vars: I) -> ConfigResult<()>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if key == "MIRRA_STORAGE" {
            config.storage = Utf8PathBuf::from(value);
            continue;
        }

        let Some(uplink) = key
            .strip_prefix("MIRRA_UPLINK_")
            .and_then(|rest| rest.strip_suffix("_URL"))
        else {
            continue;
        };

        let target = config
            .uplinks
            .iter_mut()
            .find(|(name, _)| name.replace('-', "_").eq_ignore_ascii_case(uplink));
        match target {
            Some((name, uplink_config)) => {
                validate_url(&key, &value)?;
                debug!("Uplink {} url overridden by {}", name, key);
                uplink_config.url = value;
            },
            None => {
                return Err(MirraError::ConfigValidation {
                    field: key.clone(),
                    reason: format!("no uplink named '{}' is configured", uplink.to_lowercase()),
                });
            },
        }
    }

    Ok(())
}

/// Find the configuration file to use.
///
/// An explicit path wins, then `./mirra.toml`, then the user config
/// directory (`<config dir>/mirra/config.toml`).
pub fn discover_config_path(explicit: Option<&Utf8Path>, cwd: &Utf8Path) -> ConfigResult<Utf8PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let local = cwd.join(CONFIG_FILE);
    if local.exists() {
        return Ok(local);
    }

    let user = dirs::config_dir()
        .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
        .map(|dir| dir.join("mirra").join("config.toml"));
    match user {
        Some(path) if path.exists() => Ok(path),
        _ => Err(MirraError::ConfigValidation {
            field: "config".to_string(),
            reason: format!("No {} found in {} or the user config directory", CONFIG_FILE, cwd),
        }),
    }
}
