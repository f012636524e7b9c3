//! Tarball proxying with write-through caching
//!
//! Tarballs come from the first uplink eligible for the package. When that
//! uplink caches, a local copy is served if present; otherwise the upstream
//! stream is handed to the caller while a background task persists a copy
//! of every chunk. The copy is committed only if the whole stream was
//! consumed without error and the writer kept up with the download.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use mirra_core::error::{MirraError, MirraResult};
use mirra_store::{ByteStream, LocalStorage};
use mirra_uplink::TarballStream;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::router::PackageRouter;
use crate::StorageResult;

/// Tarball bytes as handed to clients
pub type TarballBody = BoxStream<'static, MirraResult<Bytes>>;

/// Bookkeeping of background cache writes
#[derive(Debug, Default)]
pub struct CacheWrites {
    pending: AtomicUsize,
    failures: AtomicU64,
    idle: Notify,
}

impl CacheWrites {
    fn start(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self, name: &str, filename: &str, result: StorageResult<u64>) {
        match result {
            Ok(written) => info!("Cached tarball {}/{} ({} bytes)", name, filename, written),
            Err(MirraError::Io { source, .. }) if source.kind() == io::ErrorKind::Interrupted => {
                debug!("Abandoned caching of {}/{}: {}", name, filename, source)
            },
            Err(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                warn!("Failed to cache tarball {}/{}: {}", name, filename, e);
            },
        }

        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Cache writes that failed for reasons other than an abandoned download
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Cache writes still in progress
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until no cache write is in progress
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Chunks a cache copy may fall behind the download before it is dropped
const COPY_BUFFER: usize = 64;

/// Sending half of a cache copy.
///
/// The copy stream ends cleanly only after [`CopySink::close`]. Abandoning
/// the copy, or dropping the sink without closing it, makes the copy end
/// with an `Interrupted` error so the writer discards what it received.
struct CopySink {
    sender: Option<mpsc::Sender<Bytes>>,
    aborted: Arc<AtomicBool>,
}

fn copy_channel(capacity: usize) -> (CopySink, ByteStream) {
    let (sender, receiver) = mpsc::channel(capacity);
    let aborted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&aborted);

    let tail = stream::once(async move { flag.load(Ordering::SeqCst) }).filter_map(|aborted| async move {
        aborted.then(|| Err(io::Error::new(io::ErrorKind::Interrupted, "download did not complete")))
    });
    let copy = receiver.map(Ok).chain(tail).boxed();

    (
        CopySink {
            sender: Some(sender),
            aborted,
        },
        copy,
    )
}

impl CopySink {
    fn push(&mut self, chunk: &Bytes) {
        let Some(sender) = self.sender.as_mut() else {
            return;
        };
        match sender.try_send(chunk.clone()) {
            Ok(()) => {},
            Err(e) if e.is_full() => self.abandon("cache copy fell behind the download"),
            // Writer already gave up
            Err(_) => self.sender = None,
        }
    }

    fn abandon(&mut self, reason: &str) {
        if let Some(sender) = self.sender.take() {
            debug!("Dropping tarball cache copy: {}", reason);
            self.aborted.store(true, Ordering::SeqCst);
            drop(sender);
        }
    }

    fn close(&mut self) {
        self.sender = None;
    }
}

impl Drop for CopySink {
    fn drop(&mut self) {
        self.abandon("download abandoned before completion");
    }
}

/// Upstream tarball stream that copies every chunk to a cache writer
struct WriteThrough {
    upstream: TarballStream,
    sink: CopySink,
}

impl Stream for WriteThrough {
    type Item = MirraResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.upstream.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sink.push(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            },
            Poll::Ready(Some(Err(error))) => {
                this.sink.abandon(&error.message);
                Poll::Ready(Some(Err(error.into())))
            },
            Poll::Ready(None) => {
                this.sink.close();
                Poll::Ready(None)
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Serves tarballs from uplinks and the local cache
#[derive(Debug)]
pub struct TarballProxy {
    storage: Arc<dyn LocalStorage>,
    router: Arc<PackageRouter>,
    writes: Arc<CacheWrites>,
}

impl TarballProxy {
    pub fn new(storage: Arc<dyn LocalStorage>, router: Arc<PackageRouter>) -> Self {
        Self {
            storage,
            router,
            writes: Arc::new(CacheWrites::default()),
        }
    }

    /// Background cache write bookkeeping
    pub fn cache_writes(&self) -> &CacheWrites {
        &self.writes
    }

    /// Open a tarball of a package.
    ///
    /// Errors reported by the uplink before any byte was sent (missing
    /// file, bad status, offline) are returned directly; failures after
    /// that surface as an error item in the stream.
    pub async fn fetch(&self, name: &str, filename: &str) -> MirraResult<TarballBody> {
        let uplink = match self.router.resolve(name).into_iter().next() {
            Some(uplink) => uplink,
            None => {
                debug!("No uplink for {}, serving {} from local storage only", name, filename);
                return self.cached(name, filename).await.ok_or_else(|| MirraError::TarballNotFound {
                    name: name.to_string(),
                    filename: filename.to_string(),
                });
            },
        };

        let descriptor = uplink.descriptor();
        if descriptor.cache {
            if let Some(body) = self.cached(name, filename).await {
                debug!("Serving {}/{} from local cache", name, filename);
                return Ok(body);
            }
        }

        let url = descriptor.tarball_url(name, filename);
        let upstream = uplink.fetch_tarball(&url).await?;

        if !descriptor.cache {
            return Ok(upstream.map_err(MirraError::from).boxed());
        }
        Ok(self.write_through(name, filename, upstream))
    }

    async fn cached(&self, name: &str, filename: &str) -> Option<TarballBody> {
        match self.storage.read_tarball(name, filename).await {
            Ok(Some(stream)) => Some(local_body(name, filename, stream)),
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable cached tarball {}/{}: {}", name, filename, e);
                None
            },
        }
    }

    fn write_through(&self, name: &str, filename: &str, upstream: TarballStream) -> TarballBody {
        let (sink, copy) = copy_channel(COPY_BUFFER);
        let storage = Arc::clone(&self.storage);
        let writes = Arc::clone(&self.writes);
        let name = name.to_string();
        let filename = filename.to_string();

        writes.start();
        tokio::spawn(async move {
            let result = storage.write_tarball(&name, &filename, copy).await;
            writes.finish(&name, &filename, result);
        });

        WriteThrough { upstream, sink }.boxed()
    }
}

fn local_body(name: &str, filename: &str, stream: ByteStream) -> TarballBody {
    let label = format!("{}/{}", name, filename);
    stream
        .map_err(move |e| MirraError::io(format!("Failed to read cached tarball {}", label), e))
        .boxed()
}
