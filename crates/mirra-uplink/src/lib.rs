//! Upstream registry client for mirra
//!
//! This crate provides the [`Uplink`] capability used by the storage handler
//! to fetch package metadata and stream tarballs from an upstream registry,
//! and [`HttpUplink`], its reqwest implementation with timeouts, retries and
//! offline tracking.

pub mod api;
pub mod client;

// Re-export main types
pub use api::{
    FetchedMetadata, TarballStream, Uplink, UplinkDescriptor, UplinkError, UplinkErrorKind,
    BAD_STATUS_CODE, NOT_FILE_UPLINK, NOT_PACKAGE_UPLINK, UPLINK_OFFLINE,
};
pub use client::{HttpUplink, RetryConfig};

/// Result type for uplink operations
pub type UplinkResult<T> = Result<T, UplinkError>;
