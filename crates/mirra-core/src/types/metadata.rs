//! Package metadata document types.
//!
//! A document holds every published version of one package together with its
//! distribution tags and publication times. Fields this crate does not model
//! are kept verbatim in `extra` maps so documents survive a read/write cycle
//! without losing upstream data.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MirraError, MirraResult};

/// Package metadata document as served by npm-compatible registries
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Package name, possibly scoped (`@scope/name`)
    pub name: String,
    /// Version manifests keyed by version string
    #[serde(default)]
    pub versions: BTreeMap<String, VersionManifest>,
    /// Distribution tags (e.g. `latest`) pointing at version strings
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    /// Publication timestamps, plus the `created`/`modified` pseudo-keys
    #[serde(default)]
    pub time: BTreeMap<String, String>,
    /// Per-uplink fetch bookkeeping
    #[serde(rename = "_uplinks", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub uplinks: BTreeMap<String, UplinkStamp>,
    /// Fields not modelled above (readme, maintainers, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Manifest of a single published version
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Distribution information, authoritative upstream
    #[serde(default)]
    pub dist: Dist,
    /// Dependencies, scripts, and everything else
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Distribution information for a version tarball
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dist {
    /// Tarball download URL
    #[serde(default)]
    pub tarball: String,
    /// SHA-1 checksum (legacy)
    #[serde(default)]
    pub shasum: String,
    /// Subresource integrity hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// When a document was last fetched from an uplink, and with which etag
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UplinkStamp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Unix timestamp in milliseconds
    #[serde(default)]
    pub fetched: i64,
}

impl PackageMetadata {
    /// Create an empty document for a package name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse and structurally validate a document served for `name`.
    ///
    /// The payload must be a JSON object whose `name` equals the requested
    /// name; `versions`, `dist-tags` and `time` default to empty maps.
    pub fn from_slice(name: &str, bytes: &[u8]) -> MirraResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| MirraError::json(format!("Failed to parse metadata of '{}'", name), e))?;
        Self::from_value(name, value)
    }

    /// Structurally validate an already parsed document
    pub fn from_value(name: &str, value: Value) -> MirraResult<Self> {
        let invalid = |reason: String| MirraError::InvalidMetadata {
            name: name.to_string(),
            reason,
        };

        let object = value
            .as_object()
            .ok_or_else(|| invalid("not a json object".to_string()))?;
        match object.get("name").and_then(Value::as_str) {
            Some(found) if found == name => {},
            Some(found) => return Err(invalid(format!("name mismatch, got '{}'", found))),
            None => return Err(invalid("missing name".to_string())),
        }

        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
    }

    /// Serialize to pretty JSON bytes
    pub fn to_vec_pretty(&self) -> MirraResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| MirraError::json(format!("Failed to serialize metadata of '{}'", self.name), e))
    }

    /// Check whether a version is present
    pub fn has_version(&self, version: &str) -> bool {
        self.versions.contains_key(version)
    }

    /// Resolve a distribution tag to its version manifest
    pub fn tagged(&self, tag: &str) -> Option<&VersionManifest> {
        self.dist_tags.get(tag).and_then(|v| self.versions.get(v))
    }

    /// Remove distribution tags that reference unknown versions.
    ///
    /// Returns the number of tags removed.
    pub fn prune_dangling_tags(&mut self) -> usize {
        let before = self.dist_tags.len();
        let versions = &self.versions;
        self.dist_tags.retain(|_, version| versions.contains_key(version));
        before - self.dist_tags.len()
    }
}

impl UplinkStamp {
    /// Stamp a fetch that happened just now
    pub fn now(etag: Option<String>) -> Self {
        Self {
            etag,
            fetched: Utc::now().timestamp_millis(),
        }
    }

    /// Whether the fetch happened within `maxage`
    pub fn is_fresh(&self, maxage: Duration) -> bool {
        let age = Utc::now().timestamp_millis() - self.fetched;
        age >= 0 && (age as u128) < maxage.as_millis()
    }
}
