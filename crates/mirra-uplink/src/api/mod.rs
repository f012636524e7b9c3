//! Uplink capability and its classified errors

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use mirra_core::error::MirraError;
use mirra_core::types::PackageMetadata;
use mirra_core::utils::encode_package_name;

use crate::UplinkResult;

pub const NOT_PACKAGE_UPLINK: &str = "package does not exist on uplink";
pub const NOT_FILE_UPLINK: &str = "file doesn't exist on uplink";
pub const BAD_STATUS_CODE: &str = "bad status code";
pub const UPLINK_OFFLINE: &str = "uplink is offline";

/// Byte stream of a tarball served by an uplink
pub type TarballStream = BoxStream<'static, UplinkResult<Bytes>>;

/// Failure class of an uplink request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkErrorKind {
    /// The uplink reports the package does not exist
    NotPackageUplink,
    /// The uplink reports the tarball does not exist
    NotFileUplink,
    /// Unexpected status code or a payload that failed validation
    BadStatusCode,
    /// Connection failure, timeout or interrupted body
    Transport,
    /// Skipped because the uplink failed too often recently
    Offline,
}

/// Error produced by one uplink for one request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{uplink}: {message}")]
pub struct UplinkError {
    pub kind: UplinkErrorKind,
    /// Status reported to callers; absent for transport failures
    pub status_code: Option<u16>,
    /// Status the uplink actually answered with, when it differs
    pub remote_status: Option<u16>,
    pub message: String,
    pub uplink: String,
}

impl UplinkError {
    pub fn not_package(uplink: &str, status: u16) -> Self {
        Self {
            kind: UplinkErrorKind::NotPackageUplink,
            status_code: Some(status),
            remote_status: Some(status),
            message: NOT_PACKAGE_UPLINK.to_string(),
            uplink: uplink.to_string(),
        }
    }

    pub fn not_file(uplink: &str) -> Self {
        Self {
            kind: UplinkErrorKind::NotFileUplink,
            status_code: Some(404),
            remote_status: Some(404),
            message: NOT_FILE_UPLINK.to_string(),
            uplink: uplink.to_string(),
        }
    }

    /// Unexpected answer from the uplink.
    ///
    /// `status_code` is what callers see; `remote_status` is what the uplink
    /// sent, absent when the status was fine but the payload was not.
    pub fn bad_status(uplink: &str, status_code: u16, remote_status: Option<u16>, detail: &str) -> Self {
        Self {
            kind: UplinkErrorKind::BadStatusCode,
            status_code: Some(status_code),
            remote_status,
            message: format!("{}: {}", BAD_STATUS_CODE, detail),
            uplink: uplink.to_string(),
        }
    }

    pub fn transport(uplink: &str, message: impl Into<String>) -> Self {
        Self {
            kind: UplinkErrorKind::Transport,
            status_code: None,
            remote_status: None,
            message: message.into(),
            uplink: uplink.to_string(),
        }
    }

    pub fn offline(uplink: &str) -> Self {
        Self {
            kind: UplinkErrorKind::Offline,
            status_code: None,
            remote_status: None,
            message: UPLINK_OFFLINE.to_string(),
            uplink: uplink.to_string(),
        }
    }

    /// Connection-level failure (including offline), as opposed to an answer
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, UplinkErrorKind::Transport | UplinkErrorKind::Offline)
    }
}

impl From<UplinkError> for MirraError {
    fn from(error: UplinkError) -> Self {
        MirraError::Uplink {
            uplink: error.uplink,
            status: error.status_code,
            message: error.message,
        }
    }
}

/// Result of a metadata fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedMetadata {
    /// A validated document and the etag it was served with
    Modified {
        metadata: PackageMetadata,
        etag: Option<String>,
    },
    /// The document matches the etag sent with the request
    NotModified,
}

/// Static description of an uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkDescriptor {
    pub name: String,
    /// Base URL without trailing slash
    pub base_url: String,
    /// Persist fetched tarballs locally
    pub cache: bool,
    /// Freshness window of fetched metadata
    pub maxage: Duration,
}

impl UplinkDescriptor {
    pub fn new(name: impl Into<String>, base_url: impl AsRef<str>, cache: bool, maxage: Duration) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            cache,
            maxage,
        }
    }

    /// URL of the metadata document of a package
    pub fn metadata_url(&self, package: &str) -> String {
        format!("{}/{}", self.base_url, encode_package_name(package))
    }

    /// URL of a tarball of a package (`<base>/<encoded name>/-/<filename>`)
    pub fn tarball_url(&self, package: &str, filename: &str) -> String {
        format!("{}/{}/-/{}", self.base_url, encode_package_name(package), filename)
    }
}

/// An upstream registry.
///
/// Implementations are shared read-only between all requests once the
/// storage handler is initialized.
#[async_trait]
pub trait Uplink: Send + Sync + fmt::Debug {
    /// Static description of this uplink
    fn descriptor(&self) -> &UplinkDescriptor;

    /// Name used in package rules
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Fetch the metadata document of a package.
    ///
    /// `etag` is sent as a conditional request header when present.
    async fn fetch_metadata(&self, package: &str, etag: Option<&str>) -> UplinkResult<FetchedMetadata>;

    /// Open a byte stream of the tarball at `url`
    async fn fetch_tarball(&self, url: &str) -> UplinkResult<TarballStream>;
}
