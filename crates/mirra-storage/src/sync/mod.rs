//! Metadata synchronization with uplinks
//!
//! A sync fans out to every eligible uplink concurrently, merges whatever
//! came back into the local document in one pass, and persists the
//! result once. Syncs of the same package are serialized so that no merge
//! is lost to a concurrent write.

pub mod merge;

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use mirra_core::error::MirraError;
use mirra_core::types::{PackageMetadata, UplinkStamp};
use mirra_store::LocalStorage;
use mirra_uplink::{FetchedMetadata, Uplink, UplinkError, UplinkResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::router::PackageRouter;
pub use merge::{merge_uplink_documents, merge_uplink_metadata};

pub const NO_SUCH_PACKAGE: &str = "no such package available";

/// Errors of one sync, one inner list per uplink that was queried and failed
pub type SyncErrors = Vec<Vec<UplinkError>>;

/// Options of a metadata sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Consult uplinks at all; when false the local document is returned as is
    pub uplinks_look: bool,
    /// Query uplinks even when their last fetch is still fresh
    pub force_refresh: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            uplinks_look: true,
            force_refresh: false,
        }
    }
}

/// Result of a successful sync
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// The merged document
    pub metadata: PackageMetadata,
    /// Failures of individual uplinks that did not prevent the sync
    pub errors: SyncErrors,
    /// Whether the merged document was written to local storage
    pub updated: bool,
}

/// Why a sync produced no document
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No local document exists and no uplink provided one
    #[error("no such package available")]
    NoSuchPackage { name: String, errors: SyncErrors },

    /// Reading or writing local storage failed, or the request was invalid
    #[error(transparent)]
    Storage(#[from] MirraError),
}

impl SyncError {
    /// Uplink failures collected before the sync gave up
    pub fn uplink_errors(&self) -> &[Vec<UplinkError>] {
        match self {
            SyncError::NoSuchPackage { errors, .. } => errors,
            SyncError::Storage(_) => &[],
        }
    }

    /// HTTP status matching this failure
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::NoSuchPackage { .. } => 404,
            SyncError::Storage(e) => e.status_code(),
        }
    }
}

impl From<SyncError> for MirraError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::NoSuchPackage { name, errors } => {
                let reasons: Vec<String> = errors.iter().flatten().map(ToString::to_string).collect();
                let reason = if reasons.is_empty() {
                    NO_SUCH_PACKAGE.to_string()
                } else {
                    format!("{} ({})", NO_SUCH_PACKAGE, reasons.join("; "))
                };
                MirraError::PackageNotFound { name, reason }
            },
            SyncError::Storage(e) => e,
        }
    }
}

/// Outcome of querying one uplink
enum UplinkFetch {
    /// Last fetch is within the uplink's maxage
    Fresh,
    Fetched(UplinkResult<FetchedMetadata>),
}

/// Holds a per-package lock and drops its map entry once nobody else wants it
struct LockLease<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    name: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        // One reference in the map, one held here
        self.locks
            .remove_if(&self.name, |_, lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) <= 2);
    }
}

/// Synchronizes package metadata with the uplinks
#[derive(Debug)]
pub struct SyncEngine {
    storage: Arc<dyn LocalStorage>,
    router: Arc<PackageRouter>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SyncEngine {
    pub fn new(storage: Arc<dyn LocalStorage>, router: Arc<PackageRouter>) -> Self {
        Self {
            storage,
            router,
            locks: DashMap::new(),
        }
    }

    fn lease(&self, name: &str) -> LockLease<'_> {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        LockLease {
            locks: &self.locks,
            name: name.to_string(),
            lock,
        }
    }

    /// Number of packages with a sync in flight
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }

    /// Bring `local` up to date with every eligible uplink.
    ///
    /// With no eligible uplink (or `uplinks_look` off) the local document is
    /// returned untouched and nothing is written. Otherwise the merged
    /// document is persisted only when it differs from the stored one.
    pub async fn sync(
        &self,
        name: &str,
        local: Option<PackageMetadata>,
        options: SyncOptions,
    ) -> Result<SyncOutcome, SyncError> {
        let uplinks = if options.uplinks_look {
            self.router.resolve(name)
        } else {
            Vec::new()
        };

        if uplinks.is_empty() {
            debug!("No uplink to consult for {}", name);
            return match local {
                Some(metadata) => Ok(SyncOutcome {
                    metadata,
                    errors: Vec::new(),
                    updated: false,
                }),
                None => Err(SyncError::NoSuchPackage {
                    name: name.to_string(),
                    errors: Vec::new(),
                }),
            };
        }

        let lease = self.lease(name);
        let _guard = lease.lock.lock().await;
        self.sync_locked(name, local, options, &uplinks).await
    }

    async fn sync_locked(
        &self,
        name: &str,
        local: Option<PackageMetadata>,
        options: SyncOptions,
        uplinks: &[Arc<dyn Uplink>],
    ) -> Result<SyncOutcome, SyncError> {
        // A sync that finished while we waited may have stored newer data
        let stored = self.storage.read_metadata(name).await?;
        let mut found = local.is_some() || stored.is_some();
        let baseline = stored.or(local).unwrap_or_else(|| PackageMetadata::new(name));
        let mut merged = baseline.clone();

        let fetches = uplinks.iter().map(|uplink| {
            let stamp = baseline.uplinks.get(uplink.name()).cloned();
            async move {
                let etag = match &stamp {
                    Some(stamp) if !options.force_refresh && stamp.is_fresh(uplink.descriptor().maxage) => {
                        return UplinkFetch::Fresh;
                    },
                    Some(stamp) => stamp.etag.as_deref(),
                    None => None,
                };
                UplinkFetch::Fetched(uplink.fetch_metadata(name, etag).await)
            }
        });
        let results = join_all(fetches).await;

        let mut errors = Vec::new();
        let mut documents = Vec::new();
        for (uplink, result) in uplinks.iter().zip(results) {
            let uplink_name = uplink.name();
            match result {
                UplinkFetch::Fresh => {
                    debug!("Metadata of {} from {} is still fresh", name, uplink_name);
                    found = true;
                },
                UplinkFetch::Fetched(Ok(FetchedMetadata::Modified { metadata, etag })) => {
                    documents.push(metadata);
                    merged.uplinks.insert(uplink_name.to_string(), UplinkStamp::now(etag));
                    found = true;
                },
                UplinkFetch::Fetched(Ok(FetchedMetadata::NotModified)) => {
                    let etag = merged.uplinks.get(uplink_name).and_then(|stamp| stamp.etag.clone());
                    merged.uplinks.insert(uplink_name.to_string(), UplinkStamp::now(etag));
                    found = true;
                },
                UplinkFetch::Fetched(Err(error)) => {
                    warn!("Uplink {} failed to provide {}: {}", uplink_name, name, error.message);
                    errors.push(vec![error]);
                },
            }
        }

        if !documents.is_empty() {
            merge_uplink_documents(&mut merged, &documents);
        }

        if !found {
            return Err(SyncError::NoSuchPackage {
                name: name.to_string(),
                errors,
            });
        }

        let updated = merged != baseline;
        if updated {
            self.storage.write_metadata(name, &merged).await?;
            info!("Updated metadata of {} ({} versions)", name, merged.versions.len());
        }

        Ok(SyncOutcome {
            metadata: merged,
            errors,
            updated,
        })
    }
}

#[cfg(test)]
mod tests;
