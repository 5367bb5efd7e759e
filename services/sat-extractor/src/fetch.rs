//! Concurrent retrieval of hourly payloads.
//!
//! Key features:
//! - Bounded fan-out with `buffer_unordered`
//! - Per-item timeout and exponential backoff retry
//! - Atomic publication: bytes land in `<temp>.partial` and are renamed
//! - Cancellation stops new items from starting; in-flight ones drain
//!
//! A failed item is reported, never propagated: siblings always complete.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use percent_encoding::percent_decode_str;
use reqwest::{Client, Url};
use sat_common::SatError;
use suppaftp::types::FileType;
use suppaftp::FtpStream;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ExtractorConfig;
use crate::metrics::{self, FetchOutcome};
use crate::planner::SourceLocator;

/// Retrieves the bytes behind one URL.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, SatError>;
}

/// Reads `file://` URLs from the local filesystem (mirrors and tests).
#[derive(Debug, Default, Clone)]
pub struct FileTransport;

#[async_trait]
impl Transport for FileTransport {
    async fn fetch(&self, url: &Url) -> Result<Bytes, SatError> {
        let path = url
            .to_file_path()
            .map_err(|_| SatError::fetch(url.as_str(), "not a local file URL"))?;
        let data = fs::read(&path)
            .await
            .map_err(|e| SatError::fetch(url.as_str(), e))?;
        Ok(Bytes::from(data))
    }
}

/// Plain HTTP(S) GET.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, SatError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| SatError::configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &Url) -> Result<Bytes, SatError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SatError::fetch(url.as_str(), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SatError::fetch(url.as_str(), format!("HTTP error: {}", status)));
        }
        response
            .bytes()
            .await
            .map_err(|e| SatError::fetch(url.as_str(), e))
    }
}

/// Binary-mode FTP RETR with a fresh control connection per object.
///
/// Credentials embedded in the URL win over the configured ones; with
/// neither, the session logs in anonymously. Every socket operation, on the
/// control and the data connection, is bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct FtpTransport {
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl Default for FtpTransport {
    fn default() -> Self {
        Self::new(None, None, FetchOptions::default().timeout)
    }
}

impl FtpTransport {
    pub fn new(username: Option<String>, password: Option<String>, timeout: Duration) -> Self {
        Self {
            username,
            password,
            timeout,
        }
    }

    /// Login pair for `url`, percent-decoded when taken from the URL.
    fn credentials(&self, url: &Url) -> (String, String) {
        let user = if !url.username().is_empty() {
            decode_userinfo(url.username())
        } else {
            self.username.clone().unwrap_or_else(|| "anonymous".to_string())
        };
        let password = url
            .password()
            .map(decode_userinfo)
            .or_else(|| self.password.clone())
            .unwrap_or_default();
        (user, password)
    }
}

fn decode_userinfo(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Open a control connection whose reads and writes time out.
fn connect_ftp(host: &str, port: u16, timeout: Duration) -> std::io::Result<FtpStream> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("cannot resolve {}", host)))?;
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    FtpStream::connect_with_stream(stream).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

#[async_trait]
impl Transport for FtpTransport {
    async fn fetch(&self, url: &Url) -> Result<Bytes, SatError> {
        let host = url
            .host_str()
            .ok_or_else(|| SatError::fetch(url.as_str(), "missing host"))?
            .to_string();
        let port = url.port().unwrap_or(21);
        let (user, password) = self.credentials(url);
        let remote = url.path().to_string();
        let uri = url.to_string();
        let timeout = self.timeout;

        // suppaftp's sync client blocks; keep it off the async workers
        tokio::task::spawn_blocking(move || -> Result<Bytes, SatError> {
            let mut ftp = connect_ftp(&host, port, timeout).map_err(|e| SatError::fetch(&uri, e))?;
            ftp.login(&user, &password).map_err(|e| SatError::fetch(&uri, e))?;
            ftp.transfer_type(FileType::Binary)
                .map_err(|e| SatError::fetch(&uri, e))?;

            let mut data = ftp.retr_as_stream(&remote).map_err(|e| SatError::fetch(&uri, e))?;
            data.get_ref()
                .set_read_timeout(Some(timeout))
                .map_err(|e| SatError::fetch(&uri, e))?;
            let mut buffer = Vec::new();
            data.read_to_end(&mut buffer).map_err(|e| SatError::fetch(&uri, e))?;
            ftp.finalize_retr_stream(data).map_err(|e| SatError::fetch(&uri, e))?;

            if let Err(e) = ftp.quit() {
                debug!(uri = %uri, error = %e, "FTP quit failed");
            }
            Ok(Bytes::from(buffer))
        })
        .await
        .map_err(|e| SatError::fetch(url.as_str(), format!("FTP worker failed: {}", e)))?
    }
}

/// Dispatches on the URL scheme.
pub struct SchemeTransport {
    file: FileTransport,
    http: HttpTransport,
    ftp: FtpTransport,
}

impl SchemeTransport {
    pub fn from_config(config: &ExtractorConfig) -> Result<Self, SatError> {
        Ok(Self {
            file: FileTransport,
            http: HttpTransport::new(config.fetch.timeout())?,
            ftp: FtpTransport::new(
                config.source.username.clone(),
                config.source.password.clone(),
                config.fetch.timeout(),
            ),
        })
    }
}

#[async_trait]
impl Transport for SchemeTransport {
    async fn fetch(&self, url: &Url) -> Result<Bytes, SatError> {
        match url.scheme() {
            "file" => self.file.fetch(url).await,
            "http" | "https" => self.http.fetch(url).await,
            "ftp" => self.ftp.fetch(url).await,
            other => Err(SatError::fetch(url.as_str(), format!("unsupported scheme '{}'", other))),
        }
    }
}

/// Tuning for [`ParallelFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_concurrent: usize,
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout: Duration::from_secs(120),
            max_retries: 2,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

impl FetchOptions {
    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self {
            max_concurrent: config.fetch.worker_count(),
            timeout: config.fetch.timeout(),
            max_retries: config.fetch.max_retries,
            initial_retry_delay: config.fetch.initial_retry_delay(),
            max_retry_delay: config.fetch.max_retry_delay(),
        }
    }
}

/// A locator whose payload could not be retrieved.
#[derive(Debug)]
pub struct FetchFailure {
    pub locator: SourceLocator,
    pub error: SatError,
}

/// Per-item outcome of a fetch batch.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Locators whose temp file is complete on disk.
    pub succeeded: Vec<SourceLocator>,
    pub failed: Vec<FetchFailure>,
}

impl FetchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

/// Downloads a batch of locators concurrently.
pub struct ParallelFetcher {
    transport: Arc<dyn Transport>,
    base_url: Url,
    options: FetchOptions,
}

impl ParallelFetcher {
    pub fn new(transport: Arc<dyn Transport>, base_url: Url, options: FetchOptions) -> Self {
        Self {
            transport,
            base_url,
            options,
        }
    }

    /// Fetcher using the scheme-dispatching transport for the configured source.
    pub fn from_config(config: &ExtractorConfig) -> Result<Self, SatError> {
        Ok(Self::new(
            Arc::new(SchemeTransport::from_config(config)?),
            config.base_url()?,
            FetchOptions::from_config(config),
        ))
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetch every locator, at most `max_concurrent` at a time.
    ///
    /// Completion order is unspecified; the report lists successes and
    /// failures separately.
    #[instrument(skip_all, fields(items = locators.len(), width = self.options.max_concurrent))]
    pub async fn fetch_all(&self, locators: Vec<SourceLocator>, cancel: &CancellationToken) -> FetchReport {
        let width = self.options.max_concurrent.max(1);

        let results = stream::iter(locators)
            .map(|locator| async move {
                let started = Instant::now();
                let result = self.fetch_one(&locator, cancel).await;
                let outcome = match &result {
                    Ok(_) => FetchOutcome::Success,
                    Err(SatError::Cancelled) => FetchOutcome::Cancelled,
                    Err(_) => FetchOutcome::Failure,
                };
                metrics::record_fetch(outcome, started.elapsed());
                (locator, result)
            })
            .buffer_unordered(width)
            .collect::<Vec<_>>()
            .await;

        let mut report = FetchReport::default();
        for (locator, result) in results {
            match result {
                Ok(bytes) => {
                    debug!(instant = %locator.stamp(), bytes = bytes, "Fetched payload");
                    report.succeeded.push(locator);
                }
                Err(error) => {
                    warn!(instant = %locator.stamp(), error = %error, "Fetch failed");
                    report.failed.push(FetchFailure { locator, error });
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Fetch phase complete"
        );
        report
    }

    /// Fetch one locator with retries; returns the number of bytes written.
    async fn fetch_one(&self, locator: &SourceLocator, cancel: &CancellationToken) -> Result<u64, SatError> {
        if cancel.is_cancelled() {
            return Err(SatError::Cancelled);
        }

        let url = self
            .base_url
            .join(&locator.remote_path)
            .map_err(|e| SatError::fetch(&locator.remote_path, e))?;

        let mut retry_count = 0;
        let mut delay = self.options.initial_retry_delay;

        loop {
            let attempt = match tokio::time::timeout(self.options.timeout, self.transport.fetch(&url)).await {
                Ok(result) => result,
                Err(_) => Err(SatError::fetch(
                    url.as_str(),
                    format!("timed out after {}s", self.options.timeout.as_secs_f64()),
                )),
            };

            match attempt {
                Ok(data) => return write_atomically(&locator.local_temp_path, &data).await,
                Err(e) => {
                    if retry_count >= self.options.max_retries {
                        return Err(e);
                    }
                    retry_count += 1;
                    warn!(
                        url = %url,
                        error = %e,
                        retry = retry_count,
                        max_retries = self.options.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SatError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }

                    // Exponential backoff
                    delay = std::cmp::min(delay * 2, self.options.max_retry_delay);
                }
            }
        }
    }
}

/// `<path>.partial`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

async fn write_atomically(path: &Path, data: &[u8]) -> Result<u64, SatError> {
    let uri = path.display().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SatError::fetch(&uri, format!("cannot create {}: {}", parent.display(), e)))?;
    }
    let partial = partial_path(path);
    if let Err(e) = fs::write(&partial, data).await {
        fs::remove_file(&partial).await.ok();
        return Err(SatError::fetch(&uri, format!("cannot write {}: {}", partial.display(), e)));
    }
    if let Err(e) = fs::rename(&partial, path).await {
        fs::remove_file(&partial).await.ok();
        return Err(SatError::fetch(&uri, format!("cannot publish temp file: {}", e)));
    }
    Ok(data.len() as u64)
}
