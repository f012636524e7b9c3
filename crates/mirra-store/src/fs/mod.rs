//! Filesystem-backed local storage
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/jquery/package.json
//! <root>/jquery/jquery-1.5.1.tgz
//! <root>/@jquery/jquery/package.json
//! ```
//!
//! Every write goes to a temporary sibling file first and is renamed into
//! place once complete.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use futures::StreamExt;
use mirra_core::error::MirraError;
use mirra_core::types::PackageMetadata;
use mirra_core::utils::{safe_join, validate_filename};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::backend::{ByteStream, LocalStorage};
use crate::StoreResult;

const METADATA_FILE: &str = "package.json";
const CHUNK_SIZE: usize = 64 * 1024;

/// Local storage rooted at a directory
#[derive(Debug)]
pub struct FsStorage {
    /// Root directory for storage
    root_path: Utf8PathBuf,
    /// Source of unique temporary file names
    sequence: AtomicU64,
}

/// Removes a temporary file unless the write it belongs to was committed
struct TempFileGuard {
    path: Option<Utf8PathBuf>,
}

impl TempFileGuard {
    fn new(path: Utf8PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn commit(&mut self) {
        self.path = None;
    }

    /// Remove the temporary file of a failed write
    async fn discard(mut self) {
        if let Some(path) = self.path.take() {
            // The file may not exist yet
            let _ = fs::remove_file(&path).await;
        }
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        // Only reached when the write future itself is dropped
        if let Some(path) = self.path.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = fs::remove_file(&path).await;
                    });
                },
                Err(_) => {
                    let _ = std::fs::remove_file(&path);
                },
            }
        }
    }
}

impl FsStorage {
    /// Create storage rooted at `root_path`, creating the directory if needed
    pub async fn new<P: AsRef<Utf8Path>>(root_path: P) -> StoreResult<Self> {
        let root_path = root_path.as_ref().to_path_buf();

        fs::create_dir_all(&root_path)
            .await
            .map_err(|e| MirraError::io(format!("Failed to create storage directory {}", root_path), e))?;

        Ok(Self {
            root_path,
            sequence: AtomicU64::new(0),
        })
    }

    /// Get the root path of the storage
    pub fn root_path(&self) -> &Utf8Path {
        &self.root_path
    }

    /// Directory holding everything stored for a package
    fn package_dir(&self, name: &str) -> StoreResult<Utf8PathBuf> {
        safe_join(&self.root_path, name)
    }

    fn metadata_path(&self, name: &str) -> StoreResult<Utf8PathBuf> {
        Ok(self.package_dir(name)?.join(METADATA_FILE))
    }

    fn tarball_path(&self, name: &str, filename: &str) -> StoreResult<Utf8PathBuf> {
        validate_filename(filename)?;
        if filename == METADATA_FILE {
            return Err(MirraError::InvalidFilename {
                filename: filename.to_string(),
                reason: "reserved for metadata".to_string(),
            });
        }
        Ok(self.package_dir(name)?.join(filename))
    }

    /// Unique temporary sibling of `path`
    fn temp_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let file_name = path.file_name().unwrap_or("blob");
        path.with_file_name(format!(".{}.{}-{}.tmp", file_name, std::process::id(), sequence))
    }

    async fn ensure_parent(path: &Utf8Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MirraError::io(format!("Failed to create directory {}", parent), e))?;
        }
        Ok(())
    }

    /// Write a tarball stream into `temp`, returning the number of bytes
    async fn fill(temp: &Utf8Path, path: &Utf8Path, mut stream: ByteStream) -> StoreResult<u64> {
        let mut file = fs::File::create(temp)
            .await
            .map_err(|e| MirraError::io(format!("Failed to create {}", temp), e))?;

        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| MirraError::io(format!("Tarball stream for {} failed", path), e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| MirraError::io(format!("Failed to write {}", temp), e))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| MirraError::io(format!("Failed to flush {}", temp), e))?;
        file.sync_all()
            .await
            .map_err(|e| MirraError::io(format!("Failed to sync {}", temp), e))?;
        Ok(written)
    }

    async fn commit(temp: &Utf8Path, target: &Utf8Path) -> StoreResult<()> {
        fs::rename(temp, target)
            .await
            .map_err(|e| MirraError::io(format!("Failed to move {} into place", target), e))
    }
}

#[async_trait]
impl LocalStorage for FsStorage {
    async fn read_metadata(&self, name: &str) -> StoreResult<Option<PackageMetadata>> {
        let path = self.metadata_path(name)?;
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MirraError::io(format!("Failed to read {}", path), e)),
        };

        let metadata = serde_json::from_slice(&content)
            .map_err(|e| MirraError::json(format!("Corrupted metadata file {}", path), e))?;
        Ok(Some(metadata))
    }

    async fn write_metadata(&self, name: &str, metadata: &PackageMetadata) -> StoreResult<()> {
        let path = self.metadata_path(name)?;
        Self::ensure_parent(&path).await?;

        let content = metadata.to_vec_pretty()?;
        let temp = self.temp_path(&path);
        let mut guard = TempFileGuard::new(temp.clone());

        let written = async {
            fs::write(&temp, &content)
                .await
                .map_err(|e| MirraError::io(format!("Failed to write {}", temp), e))?;
            Self::commit(&temp, &path).await
        }
        .await;
        if let Err(e) = written {
            guard.discard().await;
            return Err(e);
        }
        guard.commit();

        debug!("Stored metadata of {} ({} bytes)", name, content.len());
        Ok(())
    }

    async fn read_tarball(&self, name: &str, filename: &str) -> StoreResult<Option<ByteStream>> {
        let path = self.tarball_path(name, filename)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MirraError::io(format!("Failed to open {}", path), e)),
        };

        let stream = futures::stream::try_unfold(file, |mut file| async move {
            let mut buffer = vec![0u8; CHUNK_SIZE];
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                return Ok::<_, std::io::Error>(None);
            }
            buffer.truncate(read);
            Ok(Some((Bytes::from(buffer), file)))
        });
        Ok(Some(stream.boxed()))
    }

    async fn write_tarball(&self, name: &str, filename: &str, stream: ByteStream) -> StoreResult<u64> {
        let path = self.tarball_path(name, filename)?;
        Self::ensure_parent(&path).await?;

        let temp = self.temp_path(&path);
        let mut guard = TempFileGuard::new(temp.clone());

        let written = match Self::fill(&temp, &path, stream).await {
            Ok(written) => written,
            Err(e) => {
                guard.discard().await;
                return Err(e);
            },
        };
        if let Err(e) = Self::commit(&temp, &path).await {
            guard.discard().await;
            return Err(e);
        }
        guard.commit();

        debug!("Cached tarball {}/{} ({} bytes)", name, filename, written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests;
