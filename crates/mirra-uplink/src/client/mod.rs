//! HTTP uplink with connection pooling, retry logic and offline tracking

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use mirra_config::UplinkConfig;
use mirra_core::error::{MirraError, MirraResult};
use mirra_core::types::PackageMetadata;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH};
use reqwest::{Client, ClientBuilder, StatusCode};
use tracing::{debug, info, warn};

use crate::api::{FetchedMetadata, TarballStream, Uplink, UplinkDescriptor, UplinkError, UplinkErrorKind};
use crate::UplinkResult;

/// Configuration for exponential backoff retry logic
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Consecutive failure bookkeeping
#[derive(Debug, Default)]
struct Health {
    failures: u32,
    offline_until: Option<Instant>,
}

/// Uplink backed by an npm-compatible HTTP registry
#[derive(Debug)]
pub struct HttpUplink {
    descriptor: UplinkDescriptor,
    /// Underlying HTTP client with connection pooling
    client: Client,
    /// Time limit of a metadata request, and of each response or chunk of a tarball
    timeout: Duration,
    retry_config: RetryConfig,
    max_fails: u32,
    fail_timeout: Duration,
    health: Mutex<Health>,
}

impl HttpUplink {
    /// Create an uplink from its configuration
    pub fn new(name: &str, config: &UplinkConfig) -> MirraResult<Self> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(config.timeout)
            .gzip(true)
            .user_agent(concat!("mirra/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MirraError::network(format!("Failed to create HTTP client for uplink '{}'", name), e))?;

        Ok(Self {
            descriptor: UplinkDescriptor::new(name, &config.url, config.cache, config.maxage),
            client,
            timeout: config.timeout,
            retry_config: RetryConfig {
                max_retries: config.retries,
                ..RetryConfig::default()
            },
            max_fails: config.max_fails,
            fail_timeout: config.fail_timeout,
            health: Mutex::new(Health::default()),
        })
    }

    /// Override the retry policy
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Whether requests are currently refused because of recent failures
    pub fn is_offline(&self) -> bool {
        let health = self.health.lock();
        self.max_fails > 0
            && health.failures >= self.max_fails
            && health.offline_until.is_some_and(|until| Instant::now() < until)
    }

    fn check_online(&self) -> UplinkResult<()> {
        if self.is_offline() {
            debug!("Uplink {} is offline, skipping request", self.descriptor.name);
            return Err(UplinkError::offline(&self.descriptor.name));
        }
        Ok(())
    }

    fn record_success(&self) {
        let mut health = self.health.lock();
        health.failures = 0;
        health.offline_until = None;
    }

    fn record_failure(&self) {
        let mut health = self.health.lock();
        health.failures = health.failures.saturating_add(1);
        if self.max_fails > 0 && health.failures >= self.max_fails {
            health.offline_until = Some(Instant::now() + self.fail_timeout);
            warn!(
                "Uplink {} failed {} times in a row, marking offline for {:?}",
                self.descriptor.name, health.failures, self.fail_timeout
            );
        }
    }

    /// Track the health impact of an attempt and pass its result through
    fn observe<T>(&self, result: UplinkResult<T>) -> UplinkResult<T> {
        match &result {
            Err(err) if err.kind == UplinkErrorKind::Offline => {},
            Err(err) if err.is_transport() || err.remote_status.is_some_and(|s| s >= 500) => {
                self.record_failure()
            },
            _ => self.record_success(),
        }
        result
    }

    fn transport_error(&self, error: reqwest::Error) -> UplinkError {
        let message = if error.is_timeout() {
            format!("request timed out: {}", error)
        } else {
            format!("request failed: {}", error)
        };
        UplinkError::transport(&self.descriptor.name, message)
    }

    /// Execute a request with exponential backoff, retrying transport failures only
    async fn with_retry<F, Fut, T>(&self, operation: F) -> UplinkResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = UplinkResult<T>>,
    {
        let mut delay = self.retry_config.initial_delay;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error)
                    if attempt < self.retry_config.max_retries
                        && error.kind == UplinkErrorKind::Transport =>
                {
                    attempt += 1;
                    debug!(
                        "Retrying uplink {} (attempt {}/{}): {}",
                        self.descriptor.name, attempt, self.retry_config.max_retries, error.message
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(
                        Duration::from_millis((delay.as_millis() as f64 * self.retry_config.multiplier) as u64),
                        self.retry_config.max_delay,
                    );
                },
                Err(error) => return Err(error),
            }
        }
    }

    async fn request_metadata(&self, url: &str, package: &str, etag: Option<&str>) -> UplinkResult<FetchedMetadata> {
        self.check_online()?;
        let name = &self.descriptor.name;

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        match status {
            StatusCode::NOT_MODIFIED => Ok(FetchedMetadata::NotModified),
            StatusCode::NOT_FOUND => Err(UplinkError::not_package(name, status.as_u16())),
            status if status.is_success() => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
                let metadata = PackageMetadata::from_slice(package, &body)
                    .map_err(|e| UplinkError::bad_status(name, 500, None, &e.to_string()))?;
                Ok(FetchedMetadata::Modified { metadata, etag })
            },
            status => Err(UplinkError::bad_status(name, 500, Some(status.as_u16()), &status.to_string())),
        }
    }

    async fn request_tarball(&self, url: &str) -> UplinkResult<TarballStream> {
        self.check_online()?;
        let name = self.descriptor.name.clone();

        let timeout = self.timeout;
        let response = match tokio::time::timeout(timeout, self.client.get(url).send()).await {
            Ok(sent) => sent.map_err(|e| self.transport_error(e))?,
            Err(_) => {
                return Err(UplinkError::transport(
                    &name,
                    format!("no response to tarball request within {:?}", timeout),
                ))
            },
        };
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(UplinkError::not_file(&name));
        }
        if !status.is_success() {
            return Err(UplinkError::bad_status(&name, status.as_u16(), Some(status.as_u16()), &status.to_string()));
        }

        // Each chunk must arrive within the timeout; the download as a whole may take longer
        let body = Box::pin(response.bytes_stream());
        let stream = stream::unfold(Some(body), move |body| {
            let name = name.clone();
            async move {
                let mut body = body?;
                match tokio::time::timeout(timeout, body.next()).await {
                    Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
                    Ok(Some(Err(e))) => Some((
                        Err(UplinkError::transport(&name, format!("tarball download interrupted: {}", e))),
                        None,
                    )),
                    Ok(None) => None,
                    Err(_) => Some((
                        Err(UplinkError::transport(
                            &name,
                            format!("tarball download stalled for {:?}", timeout),
                        )),
                        None,
                    )),
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[async_trait]
impl Uplink for HttpUplink {
    fn descriptor(&self) -> &UplinkDescriptor {
        &self.descriptor
    }

    async fn fetch_metadata(&self, package: &str, etag: Option<&str>) -> UplinkResult<FetchedMetadata> {
        let url = self.descriptor.metadata_url(package);
        info!("Fetching metadata of {} from uplink {}", package, self.descriptor.name);

        self.with_retry(|| async { self.observe(self.request_metadata(&url, package, etag).await) })
            .await
    }

    async fn fetch_tarball(&self, url: &str) -> UplinkResult<TarballStream> {
        info!("Fetching tarball {} from uplink {}", url, self.descriptor.name);
        let result = self.request_tarball(url).await;
        self.observe(result)
    }
}
