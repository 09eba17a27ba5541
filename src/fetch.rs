//! Remote fetching.
//!
//! The [`Fetcher`] trait is the seam between the archiver and the network: the
//! production [`HttpFetcher`] wraps a configured `reqwest::Client`, and tests
//! substitute scripted implementations.

use crate::config::Config;
use crate::error::{DownloadError, Error, FetchError, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::time::Duration;

/// Stream of body chunks
pub type BodyStream = BoxStream<'static, std::result::Result<Vec<u8>, FetchError>>;

/// Response head plus streaming body
pub struct FetchResponse {
    /// URL that produced the body (after redirects)
    pub url: String,
    /// Declared `Content-Type`
    pub content_type: Option<String>,
    /// Declared `Content-Length`
    pub content_length: Option<u64>,
    /// Body chunks
    pub body: BodyStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Abstraction over remote fetching, enabling testability
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Start a GET request and return once the response head is available
    async fn fetch(&self, url: &str) -> std::result::Result<FetchResponse, FetchError>;
}

/// Wait for the next body chunk, failing with [`FetchError::Timeout`] after `read_timeout` of silence
pub async fn next_chunk(
    body: &mut BodyStream,
    read_timeout: Duration,
    url: &str,
) -> std::result::Result<Option<Vec<u8>>, FetchError> {
    match tokio::time::timeout(read_timeout, body.next()).await {
        Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
        Ok(Some(Err(e))) => Err(e),
        Ok(None) => Ok(None),
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
        }),
    }
}

/// Fetch a whole (small) resource into memory: feeds and cover images
///
/// Bodies larger than `max_bytes`, declared or actual, are rejected as
/// [`DownloadError::MalformedContent`] before they are buffered.
pub async fn fetch_bytes(
    fetcher: &dyn Fetcher,
    url: &str,
    read_timeout: Duration,
    max_bytes: u64,
) -> Result<(Option<String>, Vec<u8>)> {
    let too_large = || {
        Error::Download(DownloadError::MalformedContent {
            url: url.to_string(),
            reason: format!("body exceeds the {} byte limit", max_bytes),
        })
    };

    let mut response = fetcher.fetch(url).await?;
    if response.content_length.is_some_and(|len| len > max_bytes) {
        return Err(too_large());
    }

    let mut bytes = Vec::with_capacity(response.content_length.unwrap_or(0) as usize);
    while let Some(chunk) = next_chunk(&mut response.body, read_timeout, url).await? {
        if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok((response.content_type, bytes))
}

/// Production [`Fetcher`] backed by `reqwest`
pub struct HttpFetcher {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl HttpFetcher {
    /// Build a client from the `[general]` timeouts and `[network]` settings
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.general.connect_timeout)
            .user_agent(config.network.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(
                config.network.max_redirects,
            ))
            .danger_accept_invalid_certs(!config.network.verify_ssl);

        if let Some(proxy_url) = &config.network.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| Error::Config {
                message: format!("invalid proxy '{}': {}", proxy_url, e),
                key: Some("network.proxy_url".to_string()),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            read_timeout: config.general.read_timeout,
        })
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchResponse, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        // Waiting for the response head counts against the read timeout
        let response = tokio::time::timeout(self.read_timeout, self.client.get(parsed).send())
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
            })?
            .map_err(|e| classify_request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_length = response.content_length();
        let final_url = response.url().to_string();

        let body_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| classify_body_error(&body_url, &e))
            })
            .boxed();

        Ok(FetchResponse {
            url: final_url,
            content_type,
            content_length,
            body,
        })
    }
}

fn classify_request_error(url: &str, e: &reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_connect() {
        FetchError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else if e.is_builder() {
        FetchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else if e.is_request() || e.is_body() {
        // Connection dropped while sending or before the head arrived
        FetchError::Interrupted {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

fn classify_body_error(url: &str, e: &reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Interrupted {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}
