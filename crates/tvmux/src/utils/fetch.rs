//! Resource fetcher
//!
//! Uniform access to `http(s)://` and `file://` resources as closable byte
//! streams. Remote fetches go through a host-keyed circuit breaker so one
//! misbehaving provider fails fast without starving the others; local files
//! are opened directly. Gzip *content-encoding* is negotiated transparently
//! by the HTTP client; *format-level* compression (a `.gz`/`.xz`/`.bz2`
//! payload) is the caller's concern and is handled by
//! [`ResourceStream::read_decompressed`] via magic-byte sniffing.

use std::time::Duration;

use bytes::Bytes;
use futures_util::TryStreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::FetcherConfig;
use crate::errors::{AppError, AppResult, SourceError};
use crate::utils::circuit_breaker::{CircuitBreakerError, CircuitBreakerRegistry};
use crate::utils::decompression::DecompressionService;
use crate::utils::url::UrlUtils;

/// What kind of payload is being fetched; selects the timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    M3u,
    Xmltv,
    Xtream,
}

/// An open byte stream plus what the transport knows about it.
///
/// Dropping the stream closes the underlying connection or file handle.
pub struct ResourceStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    content_length: Option<u64>,
}

impl std::fmt::Debug for ResourceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStream")
            .field("content_length", &self.content_length)
            .finish()
    }
}

impl ResourceStream {
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Consume the stream as a buffered reader for line/token parsing.
    pub fn into_buf_reader(self) -> BufReader<Box<dyn AsyncRead + Send + Unpin>> {
        BufReader::new(self.reader)
    }

    /// Read the whole stream, honouring `token` between chunks.
    pub async fn read_to_end(mut self, token: &CancellationToken) -> AppResult<Bytes> {
        let mut content = Vec::with_capacity(self.content_length.unwrap_or(64 * 1024) as usize);
        let mut buf = [0u8; 16 * 1024];
        loop {
            if token.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let n = self
                .reader
                .read(&mut buf)
                .await
                .map_err(|e| SourceError::fetch_failed(format!("read failed: {e}")))?;
            if n == 0 {
                break;
            }
            content.extend_from_slice(&buf[..n]);
        }
        Ok(Bytes::from(content))
    }

    /// Read the whole stream and apply format-level decompression
    /// (gzip / xz / bzip2 detected from leading magic bytes).
    pub async fn read_decompressed(self, token: &CancellationToken) -> AppResult<Vec<u8>> {
        let raw = self.read_to_end(token).await?;
        DecompressionService::decompress(raw)
            .map_err(|e| SourceError::fetch_failed(format!("decompression failed: {e}")).into())
    }
}

/// Fetcher over http(s) and file URLs with per-host circuit breaking.
#[derive(Clone)]
pub struct ResourceFetcher {
    client: reqwest::Client,
    breakers: CircuitBreakerRegistry,
    config: FetcherConfig,
}

impl ResourceFetcher {
    pub fn new(config: FetcherConfig, breakers: CircuitBreakerRegistry) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            breakers,
            config,
        }
    }

    /// The underlying HTTP client, for callers that build their own requests
    /// (the Xtream client reuses it so API calls share breaker state).
    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Breaker registry handle (host-keyed).
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn timeout_for(&self, kind: PayloadKind) -> Duration {
        match kind {
            PayloadKind::M3u => self.config.timeout.m3u,
            PayloadKind::Xmltv => self.config.timeout.xmltv,
            PayloadKind::Xtream => self.config.timeout.xtream,
        }
    }

    /// Open a URL as a byte stream.
    ///
    /// Fails with `UnsupportedScheme` for anything but http / https / file,
    /// `FetchFailed` for transport errors and non-200 statuses, and
    /// `Cancelled` when `token` fires first.
    pub async fn fetch(
        &self,
        token: &CancellationToken,
        url: &str,
        kind: PayloadKind,
    ) -> AppResult<ResourceStream> {
        let parsed = UrlUtils::parse_and_validate(url)?;

        if token.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        match parsed.scheme() {
            "file" => self.open_file(&parsed).await,
            "http" | "https" => self.open_http(token, &parsed, kind).await,
            // parse_and_validate already rejected everything else
            scheme => Err(SourceError::UnsupportedScheme {
                scheme: scheme.to_string(),
            }
            .into()),
        }
    }

    /// Fetch and fully read a URL, with format-level decompression applied.
    pub async fn fetch_bytes(
        &self,
        token: &CancellationToken,
        url: &str,
        kind: PayloadKind,
    ) -> AppResult<Vec<u8>> {
        let stream = self.fetch(token, url, kind).await?;
        stream.read_decompressed(token).await
    }

    async fn open_file(&self, url: &url::Url) -> AppResult<ResourceStream> {
        let path = url.to_file_path().map_err(|_| {
            SourceError::fetch_failed(format!("invalid file URL: {url}"))
        })?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            SourceError::fetch_failed(format!("cannot open {}: {e}", path.display()))
        })?;
        let content_length = file.metadata().await.ok().map(|m| m.len());
        debug!("opened local playlist {}", path.display());
        Ok(ResourceStream {
            reader: Box::new(file),
            content_length,
        })
    }

    async fn open_http(
        &self,
        token: &CancellationToken,
        url: &url::Url,
        kind: PayloadKind,
    ) -> AppResult<ResourceStream> {
        let host = url.host_str().unwrap_or("unknown").to_string();
        let breaker = self.breakers.for_host(&host).await;
        let timeout = self.timeout_for(kind);

        debug!(
            "fetching {} (host {host}, timeout {timeout:?})",
            UrlUtils::obfuscate_credentials(url.as_str())
        );

        let request = self.client.get(url.clone()).timeout(timeout);
        let send = breaker.execute_with_timeout(timeout, || async move {
            request.send().await.map_err(|e| {
                UrlUtils::obfuscate_credentials(&e.to_string())
            })
        });

        let response = tokio::select! {
            _ = token.cancelled() => return Err(AppError::Cancelled),
            result = send => result.map_err(|e| match e {
                CircuitBreakerError::CircuitOpen => {
                    SourceError::fetch_failed(format!("circuit breaker open for host {host}"))
                }
                CircuitBreakerError::Timeout => {
                    SourceError::fetch_failed(format!("request to {host} timed out"))
                }
                CircuitBreakerError::ServiceError(msg) => SourceError::fetch_failed(msg),
            })?,
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SourceError::fetch_status(
                status.as_u16(),
                format!(
                    "{} returned {}",
                    UrlUtils::obfuscate_credentials(url.as_str()),
                    status
                ),
            )
            .into());
        }

        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e.to_string()));
        Ok(ResourceStream {
            reader: Box::new(StreamReader::new(Box::pin(stream))),
            content_length,
        })
    }
}
