//! Storage handler facade
//!
//! [`StorageHandler`] owns the uplinks, the package router, the metadata
//! sync engine and the tarball proxy. It must be initialized once before
//! serving; every operation on an uninitialized handler fails with
//! [`MirraError::NotInitialized`].

use std::sync::Arc;

use mirra_config::Config;
use mirra_core::error::{MirraError, MirraResult};
use mirra_core::types::PackageMetadata;
use mirra_core::utils::{validate_filename, validate_package_name};
use mirra_store::{FsStorage, LocalStorage};
use mirra_uplink::{HttpUplink, Uplink};
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::router::{PackageRouter, UplinkRegistry};
use crate::sync::{SyncEngine, SyncError, SyncOptions, SyncOutcome};
use crate::tarball::{TarballBody, TarballProxy};

/// Everything built by [`StorageHandler::init`]
#[derive(Debug)]
struct Inner {
    storage: Arc<dyn LocalStorage>,
    uplinks: UplinkRegistry,
    router: Arc<PackageRouter>,
    sync: SyncEngine,
    tarballs: TarballProxy,
}

/// Entry point of the storage layer
#[derive(Debug, Default)]
pub struct StorageHandler {
    inner: OnceCell<Inner>,
}

impl StorageHandler {
    /// Create an uninitialized handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and initialize a handler backed by filesystem storage
    pub async fn from_config(config: &Config, extra_uplinks: Vec<Arc<dyn Uplink>>) -> MirraResult<Self> {
        let handler = Self::new();
        handler.init(config, extra_uplinks).await?;
        Ok(handler)
    }

    /// Initialize with filesystem storage rooted at `config.storage`.
    ///
    /// Uplinks from the configuration are built as HTTP uplinks; an entry of
    /// `extra_uplinks` replaces the configured uplink of the same name or
    /// adds a new one.
    pub async fn init(&self, config: &Config, extra_uplinks: Vec<Arc<dyn Uplink>>) -> MirraResult<()> {
        let storage = FsStorage::new(&config.storage).await?;
        self.init_with_storage(config, Arc::new(storage), extra_uplinks)
    }

    /// Initialize with a caller-provided local storage
    pub fn init_with_storage(
        &self,
        config: &Config,
        storage: Arc<dyn LocalStorage>,
        extra_uplinks: Vec<Arc<dyn Uplink>>,
    ) -> MirraResult<()> {
        if self.inner.get().is_some() {
            return Err(MirraError::AlreadyInitialized);
        }

        let mut uplinks = UplinkRegistry::new();
        for (name, uplink_config) in &config.uplinks {
            let uplink = HttpUplink::new(name, uplink_config)?;
            uplinks.insert(name.clone(), Arc::new(uplink) as Arc<dyn Uplink>);
        }
        for uplink in extra_uplinks {
            debug!("Registering uplink implementation {}", uplink.name());
            uplinks.insert(uplink.name().to_string(), uplink);
        }

        let router = Arc::new(PackageRouter::new(&config.packages, &uplinks)?);
        let inner = Inner {
            sync: SyncEngine::new(Arc::clone(&storage), Arc::clone(&router)),
            tarballs: TarballProxy::new(Arc::clone(&storage), Arc::clone(&router)),
            storage,
            uplinks,
            router,
        };

        self.inner.set(inner).map_err(|_| MirraError::AlreadyInitialized)?;
        info!(
            "Storage handler ready with {} uplinks and {} package rules",
            self.uplinks()?.len(),
            config.packages.len()
        );
        Ok(())
    }

    fn inner(&self) -> MirraResult<&Inner> {
        self.inner.get().ok_or(MirraError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.get().is_some()
    }

    /// Uplinks by name, in configuration order
    pub fn uplinks(&self) -> MirraResult<&UplinkRegistry> {
        Ok(&self.inner()?.uplinks)
    }

    /// Router resolving package names to uplinks
    pub fn router(&self) -> MirraResult<&PackageRouter> {
        Ok(&self.inner()?.router)
    }

    /// Local storage backing this handler
    pub fn local_storage(&self) -> MirraResult<&Arc<dyn LocalStorage>> {
        Ok(&self.inner()?.storage)
    }

    /// Merge uplink metadata for `name` into `local` and persist the result.
    ///
    /// See [`SyncEngine::sync`].
    pub async fn sync_uplinks_metadata(
        &self,
        name: &str,
        local: Option<PackageMetadata>,
        options: SyncOptions,
    ) -> Result<SyncOutcome, SyncError> {
        let inner = self.inner()?;
        validate_package_name(name)?;
        inner.sync.sync(name, local, options).await
    }

    /// Read the local document of a package and sync it with its uplinks
    pub async fn get_package(&self, name: &str, options: SyncOptions) -> MirraResult<PackageMetadata> {
        let inner = self.inner()?;
        validate_package_name(name)?;

        let local = inner.storage.read_metadata(name).await?;
        let outcome = inner.sync.sync(name, local, options).await?;
        Ok(outcome.metadata)
    }

    /// Open a tarball, from the local cache or the package's first uplink
    pub async fn get_tarball(&self, name: &str, filename: &str) -> MirraResult<TarballBody> {
        let inner = self.inner()?;
        validate_package_name(name)?;
        validate_filename(filename)?;
        inner.tarballs.fetch(name, filename).await
    }

    /// Number of tarball cache writes that failed since initialization
    pub fn cache_write_failures(&self) -> u64 {
        self.inner
            .get()
            .map_or(0, |inner| inner.tarballs.cache_writes().failures())
    }

    /// Wait for background cache writes to finish
    pub async fn shutdown(&self) {
        if let Some(inner) = self.inner.get() {
            let pending = inner.tarballs.cache_writes().pending();
            if pending > 0 {
                info!("Waiting for {} tarball cache writes", pending);
            }
            inner.tarballs.cache_writes().wait_idle().await;
        }
    }
}
