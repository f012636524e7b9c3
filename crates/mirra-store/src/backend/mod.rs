//! Local storage contract

use std::fmt;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use mirra_core::types::PackageMetadata;

use crate::StoreResult;

/// Byte stream read from or written to local storage
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Authoritative local copy of metadata documents and cached tarballs.
///
/// ## Atomicity
///
/// Writes either fully replace the previous content or leave it untouched: a
/// reader never observes a partially written document or tarball. A tarball
/// write is only committed when its input stream ends without error; a
/// failed or abandoned write leaves no readable file behind.
#[async_trait]
pub trait LocalStorage: Send + Sync + fmt::Debug {
    /// Read the metadata document of a package, `None` if never stored
    async fn read_metadata(&self, name: &str) -> StoreResult<Option<PackageMetadata>>;

    /// Replace the metadata document of a package
    async fn write_metadata(&self, name: &str, metadata: &PackageMetadata) -> StoreResult<()>;

    /// Open a cached tarball, `None` if not cached
    async fn read_tarball(&self, name: &str, filename: &str) -> StoreResult<Option<ByteStream>>;

    /// Store a tarball from a byte stream, returning the number of bytes written
    async fn write_tarball(&self, name: &str, filename: &str, stream: ByteStream) -> StoreResult<u64>;
}
