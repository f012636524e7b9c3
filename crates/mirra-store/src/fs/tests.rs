//! Unit tests for filesystem storage

use super::*;
use std::io;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

async fn storage() -> (TempDir, FsStorage) {
    let temp_dir = tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf()).unwrap();
    let storage = FsStorage::new(root.join("storage")).await.unwrap();
    (temp_dir, storage)
}

fn chunks(parts: Vec<io::Result<&'static [u8]>>) -> ByteStream {
    futures::stream::iter(parts.into_iter().map(|part| part.map(Bytes::from_static))).boxed()
}

async fn collect(stream: ByteStream) -> Vec<u8> {
    let parts: Vec<Bytes> = futures::TryStreamExt::try_collect(stream).await.unwrap();
    parts.concat()
}

fn leftover_temp_files(dir: &Utf8Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn test_storage_creation() {
    let (_dir, storage) = storage().await;
    assert!(storage.root_path().exists());
    assert!(storage.root_path().ends_with("storage"));
}

#[tokio::test]
async fn test_missing_metadata_is_none() {
    let (_dir, storage) = storage().await;
    assert!(storage.read_metadata("jquery").await.unwrap().is_none());
}

#[tokio::test]
async fn test_metadata_write_and_read() {
    let (_dir, storage) = storage().await;

    let mut metadata = PackageMetadata::new("@jquery/jquery");
    metadata.dist_tags.insert("latest".to_string(), "1.5.1".to_string());
    metadata.extra.insert("readme".to_string(), serde_json::json!("# jquery"));

    storage.write_metadata("@jquery/jquery", &metadata).await.unwrap();

    let path = storage.root_path().join("@jquery/jquery/package.json");
    assert!(path.exists());
    assert_eq!(leftover_temp_files(path.parent().unwrap()), 0);

    let read = storage.read_metadata("@jquery/jquery").await.unwrap().unwrap();
    assert_eq!(read, metadata);
}

#[tokio::test]
async fn test_metadata_overwrite() {
    let (_dir, storage) = storage().await;

    let mut metadata = PackageMetadata::new("jquery");
    storage.write_metadata("jquery", &metadata).await.unwrap();
    metadata.time.insert("modified".to_string(), "2020-01-01T00:00:00.000Z".to_string());
    storage.write_metadata("jquery", &metadata).await.unwrap();

    let read = storage.read_metadata("jquery").await.unwrap().unwrap();
    assert_eq!(read.time.len(), 1);
}

#[tokio::test]
async fn test_corrupted_metadata_is_an_error() {
    let (_dir, storage) = storage().await;
    let dir = storage.root_path().join("broken");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("package.json"), b"{ nope").unwrap();

    assert!(matches!(
        storage.read_metadata("broken").await,
        Err(MirraError::Json { .. })
    ));
}

#[tokio::test]
async fn test_rejects_traversal() {
    let (_dir, storage) = storage().await;
    assert!(storage.read_metadata("../outside").await.is_err());
    assert!(storage.read_tarball("jquery", "../package.json").await.is_err());
    assert!(storage.read_tarball("jquery", "package.json").await.is_err());
}

#[tokio::test]
async fn test_tarball_write_and_read() {
    let (_dir, storage) = storage().await;

    let written = storage
        .write_tarball("jquery", "jquery-1.5.1.tgz", chunks(vec![Ok(&b"hello "[..]), Ok(&b"world"[..])]))
        .await
        .unwrap();
    assert_eq!(written, 11);

    let stream = storage.read_tarball("jquery", "jquery-1.5.1.tgz").await.unwrap().unwrap();
    assert_eq!(collect(stream).await, b"hello world");
}

#[tokio::test]
async fn test_large_tarball_is_chunked_on_read() {
    let (_dir, storage) = storage().await;
    let content: &'static [u8] = Box::leak(vec![42u8; CHUNK_SIZE * 2 + 10].into_boxed_slice());

    storage
        .write_tarball("big", "big-1.0.0.tgz", chunks(vec![Ok(content)]))
        .await
        .unwrap();

    let stream = storage.read_tarball("big", "big-1.0.0.tgz").await.unwrap().unwrap();
    let parts: Vec<Bytes> = futures::TryStreamExt::try_collect(stream).await.unwrap();
    assert!(parts.len() > 1);
    assert!(parts.iter().all(|part| part.len() <= CHUNK_SIZE));
    assert_eq!(parts.concat(), content);
}

#[tokio::test]
async fn test_missing_tarball_is_none() {
    let (_dir, storage) = storage().await;
    assert!(storage.read_tarball("jquery", "jquery-1.5.1.tgz").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_tarball_write_leaves_nothing_behind() {
    let (_dir, storage) = storage().await;

    let stream = chunks(vec![
        Ok(&b"partial"[..]),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "uplink went away")),
    ]);
    assert!(storage.write_tarball("jquery", "jquery-1.5.1.tgz", stream).await.is_err());

    assert!(storage.read_tarball("jquery", "jquery-1.5.1.tgz").await.unwrap().is_none());
    assert_eq!(leftover_temp_files(&storage.root_path().join("jquery")), 0);
}

#[tokio::test]
async fn test_cancelled_tarball_write_leaves_nothing_behind() {
    let (_dir, storage) = storage().await;

    let stream = futures::stream::iter(vec![Ok(Bytes::from_static(b"partial"))])
        .chain(futures::stream::pending::<io::Result<Bytes>>())
        .boxed();
    let write = storage.write_tarball("jquery", "jquery-1.5.1.tgz", stream);
    assert!(tokio::time::timeout(Duration::from_millis(50), write).await.is_err());

    let dir = storage.root_path().join("jquery");
    for _ in 0..50 {
        if leftover_temp_files(&dir) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(leftover_temp_files(&dir), 0);
    assert!(storage.read_tarball("jquery", "jquery-1.5.1.tgz").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_write_keeps_previous_tarball() {
    let (_dir, storage) = storage().await;

    storage
        .write_tarball("jquery", "jquery-1.5.1.tgz", chunks(vec![Ok(&b"original"[..])]))
        .await
        .unwrap();

    let stream = chunks(vec![Ok(&b"repl"[..]), Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"))]);
    assert!(storage.write_tarball("jquery", "jquery-1.5.1.tgz", stream).await.is_err());

    let stream = storage.read_tarball("jquery", "jquery-1.5.1.tgz").await.unwrap().unwrap();
    assert_eq!(collect(stream).await, b"original");
}
