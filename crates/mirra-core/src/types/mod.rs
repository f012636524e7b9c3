//! Core data types for mirra.
//!
//! This module provides the package metadata document ("packument") in the
//! shape registries serve it, plus the per-uplink bookkeeping stored with it.

pub mod metadata;

// Re-export all public types
pub use metadata::{Dist, PackageMetadata, UplinkStamp, VersionManifest};
