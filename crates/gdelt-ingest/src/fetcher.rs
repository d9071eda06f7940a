//! Feed file download with resumable staging
//!
//! A file that already exists at its destination is never fetched again.
//! Bodies are streamed into `<name>.part` and renamed into place once complete
//! (and checksum-verified when the manifest carries an MD5), so an existing
//! destination always means "fully staged".

use crate::config::HttpConfig;
use crate::error::{IngestError, Result};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

const USER_AGENT: &str = concat!("gdelt-ingest/", env!("CARGO_PKG_VERSION"));

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Build the HTTP client used for both the manifest and feed files
pub fn build_http_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| IngestError::config(format!("failed to build HTTP client: {}", e)))
}

/// Outcome of a successful [`Fetcher::fetch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Destination existed; no request was made
    AlreadyStaged,
    Downloaded { bytes: u64 },
}

enum AttemptError {
    Retryable(IngestError),
    Permanent(IngestError),
}

pub struct Fetcher {
    client: Client,
    base_url: Url,
    max_retries: u32,
    backoff_base: Duration,
}

impl Fetcher {
    pub fn new(client: Client, base_url: Url, max_retries: u32) -> Self {
        Self {
            client,
            base_url,
            max_retries: max_retries.max(1),
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Base delay for exponential backoff between attempts
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Absolute URLs pass through; anything else is joined onto the base URL
    pub fn resolve_url(&self, url: &str) -> Result<Url> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base_url
                .join(url)
                .map_err(|e| IngestError::fetch(url, e)),
            Err(e) => Err(IngestError::fetch(url, e)),
        }
    }

    /// Stage `url` at `destination`, retrying transient failures
    pub async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        expected_md5: Option<&str>,
    ) -> Result<FetchStatus> {
        if tokio::fs::try_exists(destination).await? {
            debug!(file = %destination.display(), "Already staged, skipping download");
            return Ok(FetchStatus::AlreadyStaged);
        }

        let resolved = self.resolve_url(url)?;

        let mut attempt = 1;
        loop {
            match self.download_once(&resolved, destination, expected_md5).await {
                Ok(bytes) => {
                    info!(url = %resolved, bytes, "Downloaded");
                    return Ok(FetchStatus::Downloaded { bytes });
                },
                Err(AttemptError::Permanent(e)) => return Err(e),
                Err(AttemptError::Retryable(e)) if attempt >= self.max_retries => return Err(e),
                Err(AttemptError::Retryable(e)) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        url = %resolved,
                        attempt,
                        max_retries = self.max_retries,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Download attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }

    async fn download_once(
        &self,
        url: &Url,
        destination: &Path,
        expected_md5: Option<&str>,
    ) -> std::result::Result<u64, AttemptError> {
        let part = part_path(destination);
        let result = self.stream_to(url, &part, expected_md5).await;

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part, destination)
                    .await
                    .map_err(|e| AttemptError::Permanent(e.into()))?;
                Ok(bytes)
            },
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(file = %part.display(), error = %cleanup, "Could not remove partial download");
                    }
                }
                Err(e)
            },
        }
    }

    async fn stream_to(
        &self,
        url: &Url,
        part: &Path,
        expected_md5: Option<&str>,
    ) -> std::result::Result<u64, AttemptError> {
        let transient = |e: reqwest::Error| AttemptError::Retryable(IngestError::fetch(url.as_str(), e));

        let response = self.client.get(url.clone()).send().await.map_err(transient)?;

        let status = response.status();
        if !status.is_success() {
            let err = IngestError::fetch(url.as_str(), format!("HTTP {}", status));
            return Err(if is_retryable_status(status) {
                AttemptError::Retryable(err)
            } else {
                AttemptError::Permanent(err)
            });
        }

        let io_err = |e: std::io::Error| AttemptError::Retryable(IngestError::Io(e));

        let mut file = tokio::fs::File::create(part).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        let mut digest = md5::Context::new();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transient)?;
            digest.consume(&chunk);
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;
        drop(file);

        if let Some(expected) = expected_md5 {
            let actual = format!("{:x}", digest.compute());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(AttemptError::Retryable(IngestError::fetch(
                    url.as_str(),
                    format!("checksum mismatch: expected {}, got {}", expected, actual),
                )));
            }
        }

        Ok(written)
    }
}

/// 5xx plus 408 and 429; any other 4xx is permanent
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Temporary path a download is written to before being renamed into place
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    destination.with_file_name(name)
}
