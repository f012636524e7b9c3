//! # mirra-storage
//!
//! Storage handler of the mirra registry proxy.
//!
//! This crate ties the other mirra crates together:
//! - `router`: matches package names against the configured rules and
//!   resolves the uplinks allowed to serve them
//! - `sync`: fetches metadata from those uplinks concurrently, merges it
//!   into the local document and persists the result
//! - `tarball`: streams tarballs from the local cache or an uplink, writing
//!   cacheable ones through to local storage
//! - `handler`: the [`StorageHandler`] facade used by the registry front end
//!
//! ## Example
//!
//! ```no_run
//! use mirra_storage::{StorageHandler, SyncOptions};
//!
//! # async fn example(config: mirra_config::Config) -> mirra_core::MirraResult<()> {
//! let handler = StorageHandler::from_config(&config, Vec::new()).await?;
//! let metadata = handler.get_package("jquery", SyncOptions::default()).await?;
//! println!("{} has {} versions", metadata.name, metadata.versions.len());
//! # Ok(())
//! # }
//! ```

pub mod handler;
pub mod router;
pub mod sync;
pub mod tarball;

// Re-export main types
pub use handler::StorageHandler;
pub use router::{PackageRouter, UplinkRegistry};
pub use sync::{merge_uplink_documents, merge_uplink_metadata, SyncEngine, SyncError, SyncErrors, SyncOptions, SyncOutcome, NO_SUCH_PACKAGE};
pub use tarball::{CacheWrites, TarballBody, TarballProxy};

use mirra_core::error::MirraError;

/// Result type for storage handler operations
pub type StorageResult<T> = Result<T, MirraError>;
