//! Error types and result aliases for mirra operations.
//!
//! Provides a unified error type that covers the failure conditions of the
//! registry proxy: configuration, name validation, uplink traffic and local
//! storage I/O.

use thiserror::Error;

/// Unified error type for all mirra operations
#[derive(Error, Debug)]
pub enum MirraError {
    // Config errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Configuration field '{field}' is invalid: {reason}")]
    ConfigValidation { field: String, reason: String },

    // Request validation errors
    #[error("Invalid package name '{name}': {reason}")]
    InvalidPackageName { name: String, reason: String },

    #[error("Invalid tarball filename '{filename}': {reason}")]
    InvalidFilename { filename: String, reason: String },

    // Registry errors
    #[error("Package '{name}' not found: {reason}")]
    PackageNotFound { name: String, reason: String },

    #[error("Invalid metadata document for '{name}': {reason}")]
    InvalidMetadata { name: String, reason: String },

    #[error("Tarball '{filename}' of package '{name}' not found")]
    TarballNotFound { name: String, filename: String },

    #[error("Uplink '{uplink}' failed{}: {message}", status_suffix(.status))]
    Uplink {
        uplink: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Lifecycle errors
    #[error("Storage handler used before initialization")]
    NotInitialized,

    #[error("Storage handler is already initialized")]
    AlreadyInitialized,

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!(" with status {}", status),
        None => String::new(),
    }
}

/// Result type alias for mirra operations
pub type MirraResult<T> = Result<T, MirraError>;

impl MirraError {
    /// Create a network error from any error type
    pub fn network<E>(message: String, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Network {
            message,
            source: Some(Box::new(source)),
        }
    }

    /// Create an IO error from std::io::Error
    pub fn io(message: String, source: std::io::Error) -> Self {
        Self::Io { message, source }
    }

    /// Create a JSON error from serde_json::Error
    pub fn json(message: String, source: serde_json::Error) -> Self {
        Self::Json { message, source }
    }

    /// HTTP status the transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            MirraError::InvalidPackageName { .. } | MirraError::InvalidFilename { .. } => 400,
            MirraError::PackageNotFound { .. } | MirraError::TarballNotFound { .. } => 404,
            MirraError::Uplink {
                status: Some(status),
                ..
            } => *status,
            MirraError::Uplink { status: None, .. } | MirraError::Network { .. } => 502,
            _ => 500,
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MirraError::Network { .. } | MirraError::Io { .. } | MirraError::Uplink { status: None, .. }
        )
    }

    /// Get a user-friendly suggestion for fixing this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            MirraError::PackageNotFound { .. } => {
                Some("Check the package name spelling and the proxy list of the matching package rule")
            },
            MirraError::Network { .. } | MirraError::Uplink { status: None, .. } => {
                Some("Check that the uplink is reachable from this host")
            },
            MirraError::ConfigParse { .. } | MirraError::ConfigValidation { .. } => {
                Some("Run 'mirra check' to validate the configuration file")
            },
            MirraError::NotInitialized => Some("Call StorageHandler::init before serving requests"),
            _ => None,
        }
    }
}
