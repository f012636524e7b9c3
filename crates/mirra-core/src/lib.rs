//! # mirra-core
//!
//! Core types and utilities shared across all mirra crates.
//!
//! This crate provides:
//! - The package metadata document served to clients and merged from uplinks
//! - MirraError enum for unified error handling
//! - Package name and storage path helpers
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `types`: Metadata document types (PackageMetadata, VersionManifest, etc.)
//! - `error`: Error types and result aliases
//! - `utils`: Name validation, URL segment encoding, safe path joins

pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{MirraError, MirraResult};
pub use types::{Dist, PackageMetadata, UplinkStamp, VersionManifest};
