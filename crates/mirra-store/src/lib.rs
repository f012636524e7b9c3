//! Local package storage for mirra
//!
//! This crate provides the [`LocalStorage`] contract the storage handler
//! persists metadata documents and cached tarballs through, and
//! [`FsStorage`], a filesystem implementation with atomic writes.

pub mod backend;
pub mod fs;

// Re-export main types
pub use backend::{ByteStream, LocalStorage};
pub use fs::FsStorage;

use mirra_core::error::MirraError;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, MirraError>;
