//! Unit tests for metadata synchronization

use super::*;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use indexmap::IndexMap;
use mirra_config::PackageRule;
use mirra_core::types::{Dist, VersionManifest};
use mirra_store::ByteStream;
use mirra_uplink::{TarballStream, UplinkDescriptor};

use crate::router::UplinkRegistry;
use crate::StorageResult;

#[derive(Debug, Default)]
struct MemoryStorage {
    documents: StdMutex<HashMap<String, PackageMetadata>>,
    writes: AtomicUsize,
}

impl MemoryStorage {
    fn with_document(metadata: PackageMetadata) -> Self {
        let storage = Self::default();
        storage.documents.lock().unwrap().insert(metadata.name.clone(), metadata);
        storage
    }

    fn stored(&self, name: &str) -> Option<PackageMetadata> {
        self.documents.lock().unwrap().get(name).cloned()
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalStorage for MemoryStorage {
    async fn read_metadata(&self, name: &str) -> StorageResult<Option<PackageMetadata>> {
        Ok(self.stored(name))
    }

    async fn write_metadata(&self, name: &str, metadata: &PackageMetadata) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.documents.lock().unwrap().insert(name.to_string(), metadata.clone());
        Ok(())
    }

    async fn read_tarball(&self, _name: &str, _filename: &str) -> StorageResult<Option<ByteStream>> {
        Ok(None)
    }

    async fn write_tarball(&self, _name: &str, _filename: &str, stream: ByteStream) -> StorageResult<u64> {
        let chunks: Vec<_> = stream.collect().await;
        Ok(chunks.into_iter().filter_map(Result::ok).map(|c| c.len() as u64).sum())
    }
}

/// Uplink answering from a queue of canned responses
#[derive(Debug)]
struct ScriptedUplink {
    descriptor: UplinkDescriptor,
    responses: StdMutex<VecDeque<UplinkResult<FetchedMetadata>>>,
    etags: StdMutex<Vec<Option<String>>>,
    delay: Duration,
}

impl ScriptedUplink {
    fn new(name: &str, responses: Vec<UplinkResult<FetchedMetadata>>) -> Self {
        Self {
            descriptor: UplinkDescriptor::new(name, format!("http://{}.test", name), true, Duration::from_secs(120)),
            responses: StdMutex::new(responses.into()),
            etags: StdMutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.etags.lock().unwrap().len()
    }
}

#[async_trait]
impl Uplink for ScriptedUplink {
    fn descriptor(&self) -> &UplinkDescriptor {
        &self.descriptor
    }

    async fn fetch_metadata(&self, _package: &str, etag: Option<&str>) -> UplinkResult<FetchedMetadata> {
        self.etags.lock().unwrap().push(etag.map(str::to_string));
        let response = self.responses.lock().unwrap().pop_front();
        tokio::time::sleep(self.delay).await;
        response.unwrap_or_else(|| Err(UplinkError::not_package(self.name(), 404)))
    }

    async fn fetch_tarball(&self, _url: &str) -> UplinkResult<TarballStream> {
        Err(UplinkError::not_file(self.name()))
    }
}

fn document(versions: &[&str]) -> PackageMetadata {
    let mut metadata = PackageMetadata::new("jquery");
    for version in versions {
        metadata.versions.insert(
            version.to_string(),
            VersionManifest {
                name: "jquery".to_string(),
                version: version.to_string(),
                dist: Dist {
                    tarball: format!("http://upstream/jquery/-/jquery-{}.tgz", version),
                    ..Dist::default()
                },
                ..VersionManifest::default()
            },
        );
    }
    if let Some(latest) = versions.last() {
        metadata.dist_tags.insert("latest".to_string(), latest.to_string());
    }
    metadata
}

fn modified(versions: &[&str], etag: &str) -> UplinkResult<FetchedMetadata> {
    Ok(FetchedMetadata::Modified {
        metadata: document(versions),
        etag: Some(etag.to_string()),
    })
}

fn engine(storage: Arc<MemoryStorage>, uplinks: &[Arc<ScriptedUplink>]) -> SyncEngine {
    let registry: UplinkRegistry = uplinks
        .iter()
        .map(|uplink| (uplink.name().to_string(), Arc::clone(uplink) as Arc<dyn Uplink>))
        .collect();
    let proxy: Vec<&str> = uplinks.iter().map(|uplink| uplink.name()).collect();
    let mut packages = IndexMap::new();
    packages.insert("jquery".to_string(), PackageRule::proxied(&proxy));
    packages.insert("**".to_string(), PackageRule::proxied(&[]));

    let router = PackageRouter::new(&packages, &registry).unwrap();
    SyncEngine::new(storage, Arc::new(router))
}

#[tokio::test]
async fn test_no_eligible_uplink_returns_local_untouched() {
    let storage = Arc::new(MemoryStorage::default());
    let uplink = Arc::new(ScriptedUplink::new("npmjs", vec![modified(&["1.0.0"], "\"a\"")]));
    let engine = engine(Arc::clone(&storage), &[Arc::clone(&uplink)]);

    let mut local = PackageMetadata::new("lodash");
    local.dist_tags.insert("latest".to_string(), "9.9.9".to_string());

    let outcome = engine
        .sync("lodash", Some(local.clone()), SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.metadata, local);
    assert!(outcome.errors.is_empty());
    assert!(!outcome.updated);
    assert_eq!(storage.writes(), 0);
    assert_eq!(uplink.calls(), 0);
}

#[tokio::test]
async fn test_uplinks_look_disabled_skips_uplinks() {
    let storage = Arc::new(MemoryStorage::default());
    let uplink = Arc::new(ScriptedUplink::new("npmjs", vec![modified(&["1.0.0"], "\"a\"")]));
    let engine = engine(Arc::clone(&storage), &[Arc::clone(&uplink)]);

    let options = SyncOptions {
        uplinks_look: false,
        ..SyncOptions::default()
    };
    let outcome = engine.sync("jquery", Some(document(&[])), options).await.unwrap();

    assert!(outcome.metadata.versions.is_empty());
    assert_eq!(uplink.calls(), 0);
    assert_eq!(storage.writes(), 0);
}

#[tokio::test]
async fn test_no_eligible_uplink_and_no_local_fails() {
    let storage = Arc::new(MemoryStorage::default());
    let engine = engine(Arc::clone(&storage), &[]);

    let err = engine.sync("lodash", None, SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::NoSuchPackage { .. }));
    assert!(err.uplink_errors().is_empty());
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_fetched_document_is_merged_and_stored_once() {
    let storage = Arc::new(MemoryStorage::default());
    let uplink = Arc::new(ScriptedUplink::new("npmjs", vec![modified(&["1.5.0", "1.5.1"], "\"v1\"")]));
    let engine = engine(Arc::clone(&storage), &[uplink]);

    let outcome = engine.sync("jquery", None, SyncOptions::default()).await.unwrap();

    assert!(outcome.updated);
    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.metadata.versions.len(), 2);
    assert_eq!(outcome.metadata.uplinks["npmjs"].etag.as_deref(), Some("\"v1\""));
    assert_eq!(storage.writes(), 1);
    assert_eq!(storage.stored("jquery").unwrap(), outcome.metadata);
}

#[tokio::test]
async fn test_fresh_uplink_is_not_queried() {
    let mut stored = document(&["1.0.0"]);
    stored
        .uplinks
        .insert("npmjs".to_string(), UplinkStamp::now(Some("\"v1\"".to_string())));
    let storage = Arc::new(MemoryStorage::with_document(stored.clone()));
    let uplink = Arc::new(ScriptedUplink::new("npmjs", vec![modified(&["2.0.0"], "\"v2\"")]));
    let engine = engine(Arc::clone(&storage), &[Arc::clone(&uplink)]);

    let outcome = engine
        .sync("jquery", Some(stored.clone()), SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.metadata, stored);
    assert!(!outcome.updated);
    assert_eq!(uplink.calls(), 0);
    assert_eq!(storage.writes(), 0);

    let options = SyncOptions {
        force_refresh: true,
        ..SyncOptions::default()
    };
    let outcome = engine.sync("jquery", Some(stored), options).await.unwrap();
    assert!(outcome.metadata.has_version("2.0.0"));
    assert_eq!(uplink.calls(), 1);
    assert_eq!(uplink.etags.lock().unwrap()[0].as_deref(), Some("\"v1\""));
}

#[tokio::test]
async fn test_not_modified_refreshes_stamp() {
    let mut stored = document(&["1.0.0"]);
    stored.uplinks.insert(
        "npmjs".to_string(),
        UplinkStamp {
            etag: Some("\"v1\"".to_string()),
            fetched: 0,
        },
    );
    let storage = Arc::new(MemoryStorage::with_document(stored.clone()));
    let uplink = Arc::new(ScriptedUplink::new("npmjs", vec![Ok(FetchedMetadata::NotModified)]));
    let engine = engine(Arc::clone(&storage), &[Arc::clone(&uplink)]);

    let outcome = engine.sync("jquery", Some(stored), SyncOptions::default()).await.unwrap();

    let stamp = &outcome.metadata.uplinks["npmjs"];
    assert_eq!(stamp.etag.as_deref(), Some("\"v1\""));
    assert!(stamp.fetched > 0);
    assert_eq!(outcome.metadata.versions.len(), 1);
    assert_eq!(uplink.etags.lock().unwrap()[0].as_deref(), Some("\"v1\""));
}

#[tokio::test]
async fn test_partial_failure_keeps_successful_merge() {
    let storage = Arc::new(MemoryStorage::default());
    let failing = Arc::new(ScriptedUplink::new("broken", vec![]));
    let working = Arc::new(ScriptedUplink::new("npmjs", vec![modified(&["1.5.1"], "\"v1\"")]));
    let engine = engine(Arc::clone(&storage), &[failing, working]);

    let outcome = engine.sync("jquery", None, SyncOptions::default()).await.unwrap();

    assert!(outcome.metadata.has_version("1.5.1"));
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0][0].uplink, "broken");
    assert_eq!(outcome.errors[0][0].status_code, Some(404));
    assert_eq!(storage.writes(), 1);
}

#[tokio::test]
async fn test_every_uplink_failing_without_local_is_not_found() {
    let storage = Arc::new(MemoryStorage::default());
    let first = Arc::new(ScriptedUplink::new("first", vec![]));
    let second = Arc::new(ScriptedUplink::new(
        "second",
        vec![Err(UplinkError::bad_status("second", 500, None, "corrupted"))],
    ));
    let engine = engine(Arc::clone(&storage), &[first, second]);

    let err = engine.sync("jquery", None, SyncOptions::default()).await.unwrap_err();

    let errors = err.uplink_errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0][0].message, mirra_uplink::NOT_PACKAGE_UPLINK);
    assert_eq!(errors[1][0].status_code, Some(500));
    assert_eq!(storage.writes(), 0);

    let converted: MirraError = err.into();
    assert_eq!(converted.status_code(), 404);
}

#[tokio::test]
async fn test_every_uplink_failing_with_local_returns_local() {
    let storage = Arc::new(MemoryStorage::default());
    let uplink = Arc::new(ScriptedUplink::new("npmjs", vec![]));
    let engine = engine(Arc::clone(&storage), &[uplink]);

    let local = document(&["1.0.0"]);
    let outcome = engine
        .sync("jquery", Some(local.clone()), SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.metadata, local);
    assert_eq!(outcome.errors.len(), 1);
    assert!(!outcome.updated);
    assert_eq!(storage.writes(), 0);
}

#[tokio::test]
async fn test_concurrent_syncs_lose_no_versions() {
    let storage = Arc::new(MemoryStorage::default());
    let uplink = Arc::new(
        ScriptedUplink::new(
            "npmjs",
            vec![modified(&["1.0.0"], "\"v1\""), modified(&["2.0.0"], "\"v2\"")],
        )
        .with_delay(Duration::from_millis(30)),
    );
    let engine = engine(Arc::clone(&storage), &[uplink]);
    let options = SyncOptions {
        force_refresh: true,
        ..SyncOptions::default()
    };

    let (first, second) = tokio::join!(
        engine.sync("jquery", None, options),
        engine.sync("jquery", None, options)
    );
    first.unwrap();
    second.unwrap();

    let stored = storage.stored("jquery").unwrap();
    assert!(stored.has_version("1.0.0"));
    assert!(stored.has_version("2.0.0"));
    assert_eq!(stored.dist_tags["latest"], "2.0.0");
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test]
async fn test_every_answering_uplink_is_stamped() {
    let storage = Arc::new(MemoryStorage::default());
    let slow = Arc::new(
        ScriptedUplink::new("slow", vec![modified(&["1.0.0"], "\"slow\"")]).with_delay(Duration::from_millis(40)),
    );
    let fast = Arc::new(ScriptedUplink::new("fast", vec![modified(&["1.0.0"], "\"fast\"")]));
    let engine = engine(Arc::clone(&storage), &[Arc::clone(&slow), Arc::clone(&fast)]);

    let outcome = engine.sync("jquery", None, SyncOptions::default()).await.unwrap();

    assert_eq!(outcome.metadata.uplinks.len(), 2);
    assert_eq!(slow.calls(), 1);
    assert_eq!(fast.calls(), 1);
    assert_eq!(outcome.metadata.versions.len(), 1);
}

#[tokio::test]
async fn test_tag_may_point_at_version_of_another_uplink() {
    let mut tagged = document(&["1.0.0"]);
    tagged.dist_tags.insert("next".to_string(), "2.0.0".to_string());
    let tagged: UplinkResult<FetchedMetadata> = Ok(FetchedMetadata::Modified {
        metadata: tagged,
        etag: None,
    });

    for tagged_first in [true, false] {
        let storage = Arc::new(MemoryStorage::default());
        let a = Arc::new(ScriptedUplink::new("a", vec![tagged.clone()]));
        let b = Arc::new(ScriptedUplink::new("b", vec![modified(&["2.0.0"], "\"b\"")]));
        let uplinks = if tagged_first { [a, b] } else { [b, a] };
        let engine = engine(Arc::clone(&storage), &uplinks);

        let outcome = engine.sync("jquery", None, SyncOptions::default()).await.unwrap();

        assert_eq!(outcome.metadata.dist_tags["next"], "2.0.0");
        assert_eq!(outcome.metadata.dist_tags["latest"], "2.0.0");
        assert_eq!(storage.writes(), 1);
    }
}
