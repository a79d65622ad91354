//! Shared HTTP plumbing for provider clients and candidate downloads.
//!
//! Provider searches go through [`HttpClient::send_json`], which owns the
//! only retry loop in the system: transient network failures are retried a
//! small fixed number of times with exponential backoff, every other failure
//! kind is returned at once.

use std::io::Cursor;
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use imagefetch_common::{Error, ImageFormat, ProviderKind, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{Candidate, CandidateRef, FetchError, ImageFetcher, ProviderError};
use crate::config::RetryConfig;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.transient_retries,
            initial_backoff: Duration::from_millis(config.backoff_base_ms),
            max_backoff: Duration::from_millis(config.backoff_max_ms),
            backoff_multiplier: 2.0,
        }
    }

    /// No retries, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    pub fn should_retry(&self, error: &ProviderError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }

    /// Delay before retry number `retry_count` (zero-based), capped at
    /// `max_backoff`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let ms = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exp);
        let capped = ms.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Map a non-success HTTP status to a provider signal.
pub fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("HTTP {}", status.as_u16());
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::QuotaExceeded(detail),
        // Google reports daily quota exhaustion as 403 with a reason code.
        StatusCode::FORBIDDEN if is_quota_reason(body) => ProviderError::QuotaExceeded(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthFailure(detail),
        StatusCode::REQUEST_TIMEOUT => ProviderError::TransientNetwork(detail),
        s if s.is_server_error() => ProviderError::TransientNetwork(detail),
        _ => ProviderError::MalformedResponse(detail),
    }
}

fn is_quota_reason(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    body.contains("limitexceeded") || body.contains("quotaexceeded")
}

fn classify_transport(error: &reqwest::Error) -> ProviderError {
    if error.is_decode() {
        ProviderError::MalformedResponse(error.to_string())
    } else {
        ProviderError::TransientNetwork(error.to_string())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Thin wrapper around a shared `reqwest::Client` with the retry policy
/// attached. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("imagefetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, retry })
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send the request produced by `build` and decode a JSON body.
    ///
    /// `build` is called once per attempt so the request can be re-signed.
    pub async fn send_json<T, F>(&self, provider: ProviderKind, build: F) -> std::result::Result<T, ProviderError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut retries = 0u32;
        loop {
            match self.attempt(&build).await {
                Ok(value) => return Ok(value),
                Err(e) if self.retry.should_retry(&e, retries) => {
                    let wait = self.retry.backoff(retries);
                    retries += 1;
                    warn!(
                        provider = %provider,
                        retry = retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Transient provider error, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt<T, F>(&self, build: &F) -> std::result::Result<T, ProviderError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let resp = build(&self.client)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| classify_transport(&e))?;

        if !status.is_success() {
            return Err(classify_status(status, &String::from_utf8_lossy(&body)));
        }

        serde_json::from_slice(&body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Candidate downloads
// ---------------------------------------------------------------------------

/// Downloads candidate images over HTTP, paced process-wide.
///
/// Bodies are read chunk by chunk and abandoned once they pass `max_bytes`,
/// so an oversized candidate never sits in memory whole.
pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: DefaultDirectRateLimiter,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(http: &HttpClient, downloads_per_second: u32, max_bytes: u64) -> Self {
        let per_second = NonZeroU32::new(downloads_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            client: http.inner().clone(),
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            max_bytes,
        }
    }
}

fn download_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Download(e.to_string())
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, reference: &CandidateRef) -> std::result::Result<Candidate, FetchError> {
        self.limiter.until_ready().await;

        let mut resp = self
            .client
            .get(&reference.url)
            .send()
            .await
            .map_err(download_error)?;

        if !resp.status().is_success() {
            return Err(FetchError::Download(format!("HTTP {}", resp.status().as_u16())));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(ct) = &content_type {
            if !ct.trim().to_ascii_lowercase().starts_with("image/") {
                return Err(FetchError::ContentType(ct.clone()));
            }
        }

        if resp.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::TooLarge(self.max_bytes));
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = resp.chunk().await.map_err(download_error)? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                debug!(url = %reference.url, limit = self.max_bytes, "Candidate body over size limit");
                return Err(FetchError::TooLarge(self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %reference.url, bytes = body.len(), "Downloaded candidate");
        inspect_image(reference, body.freeze())
    }
}

/// Read the real dimensions and format from image bytes. Decoded values
/// override whatever the provider declared.
pub fn inspect_image(
    reference: &CandidateRef,
    bytes: Bytes,
) -> std::result::Result<Candidate, FetchError> {
    let reader = image::ImageReader::new(Cursor::new(bytes.as_ref()))
        .with_guessed_format()
        .map_err(|e| FetchError::Undecodable(e.to_string()))?;

    // Bytes identified as an unsupported format have no format at all; the
    // declared one only stands in when the bytes cannot be identified.
    let format = match reader.format() {
        Some(detected) => map_format(detected),
        None => reference.format,
    };
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| FetchError::Undecodable(e.to_string()))?;

    Ok(Candidate::new(reference, width, height, format, bytes))
}

fn map_format(format: image::ImageFormat) -> Option<ImageFormat> {
    match format {
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::WebP => Some(ImageFormat::Webp),
        image::ImageFormat::Gif => Some(ImageFormat::Gif),
        image::ImageFormat::Bmp => Some(ImageFormat::Bmp),
        _ => None,
    }
}
