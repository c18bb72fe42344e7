//! HTTP client for artifact downloads.
//!
//! Wraps `reqwest` with the behaviour the fetcher needs:
//! - Automatic retry with exponential backoff for transient failures
//! - Resuming a partially streamed body with a `Range` request
//! - A hard cap on the number of bytes accepted
//! - Progress callbacks and cancellation
//!
//! # Examples
//!
//! ```no_run
//! use formulary_pm::http::{HttpClient, HttpClientConfig};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HttpClientConfig::new()
//!     .with_max_retries(5)
//!     .with_retry_delay(Duration::from_millis(500));
//!
//! let client = HttpClient::with_config(config)?;
//! # Ok(())
//! # }
//! ```

use std::io::SeekFrom;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

const DEFAULT_USER_AGENT: &str = concat!("formulary/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Progress callback: `(downloaded, total)`; total is 0 when unknown.
pub type ProgressCallback = std::sync::Arc<dyn Fn(u64, u64) + Send + Sync>;

pub struct HttpClient {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .user_agent(DEFAULT_USER_AGENT);

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        })
    }

    /// Stream `url` into `file`, retrying transient failures.
    ///
    /// Returns the number of bytes written. Bytes already written by a failed
    /// attempt are kept when the server honours a `Range` request; otherwise
    /// the file is truncated and the transfer restarts.
    pub async fn download(
        &self,
        url: &str,
        file: &mut File,
        max_size: u64,
        progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let mut written: u64 = 0;
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match self
                .download_attempt(url, file, &mut written, max_size, progress, cancel)
                .await
            {
                Ok(()) => return Ok(written),
                Err(e) if e.is_retryable() => {
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        self.max_retries + 1,
                        url,
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            // Don't sleep after the last attempt
            if attempt < self.max_retries {
                // Exponential backoff: 1s, 2s, 4s, 8s, etc.
                let delay = self.retry_delay.saturating_mul(2_u32.saturating_pow(attempt));
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Err(FetchError::MaxRetries {
                url: url.to_string(),
            }),
        }
    }

    async fn download_attempt(
        &self,
        url: &str,
        file: &mut File,
        written: &mut u64,
        max_size: u64,
        progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.send(url, *written) => response?,
        };

        let status = response.status();
        if status == StatusCode::PARTIAL_CONTENT && *written > 0 {
            log::debug!("Resuming {} at byte {}", url, written);
        } else if status.is_success() {
            if *written > 0 {
                log::debug!("Server ignored range request, restarting {}", url);
                file.set_len(0).await?;
                file.seek(SeekFrom::Start(0)).await?;
                *written = 0;
            }
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        } else {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length().map(|len| len + *written).unwrap_or(0);
        if total > max_size {
            return Err(FetchError::SizeLimitExceeded {
                url: url.to_string(),
                limit: max_size,
            });
        }

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| FetchError::from_reqwest(url, e))?;

            if *written + chunk.len() as u64 > max_size {
                return Err(FetchError::SizeLimitExceeded {
                    url: url.to_string(),
                    limit: max_size,
                });
            }

            file.write_all(&chunk).await?;
            *written += chunk.len() as u64;

            if let Some(callback) = progress {
                callback(*written, total);
            }
        }

        file.flush().await?;
        Ok(())
    }

    async fn send(&self, url: &str, offset: u64) -> Result<Response, FetchError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

/// Retry and proxy settings; `Config::http_config` fills these from the
/// user's configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout. The fetcher applies its own overall deadline.
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub proxy: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            proxy: None,
        }
    }
}

impl HttpClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = HttpClientConfig::new()
            .with_max_retries(5)
            .with_retry_delay(Duration::from_millis(10))
            .with_proxy("http://proxy.internal:3128".to_string());

        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(10));
        assert_eq!(config.proxy.as_deref(), Some("http://proxy.internal:3128"));
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let config = HttpClientConfig::new().with_proxy("not a url".to_string());
        assert!(HttpClient::with_config(config).is_err());
    }
}
