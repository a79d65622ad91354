//! Image-search providers.
//!
//! Every provider exposes the same [`ImageSearch`] capability: turn a query
//! into a bounded list of candidate references. The closed set of concrete
//! providers is [`ProviderClient`]; tests substitute their own
//! implementations of the trait.
//!
//! Candidate bytes are fetched lazily through a [`CandidateStream`], one at
//! a time, so the orchestrator stops downloading as soon as one is accepted.

pub mod amazon;
pub mod bing;
pub mod google;
pub mod http;
pub mod query;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use imagefetch_common::{ImageFormat, ProviderKind, ProviderStatus};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::credentials::{Credential, Usage};

pub use amazon::AmazonClient;
pub use bing::BingClient;
pub use google::GoogleClient;
pub use http::{HttpClient, HttpFetcher, RetryPolicy};
pub use query::{build_query, fallback_query, QueryKind, SearchQuery};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a provider search call. Only `TransientNetwork` is retried,
/// and only inside the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("authorization failed: {0}")]
    AuthFailure(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("no results")]
    NoResults,

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Sub-status recorded for the provider in the outcome.
    pub fn status(&self) -> ProviderStatus {
        match self {
            Self::AuthFailure(_) => ProviderStatus::AuthFailure,
            Self::QuotaExceeded(_) => ProviderStatus::QuotaExceeded,
            Self::TransientNetwork(_) => ProviderStatus::NetworkError,
            Self::NoResults => ProviderStatus::NoResults,
            Self::MalformedResponse(_) => ProviderStatus::MalformedResponse,
        }
    }

    /// How the call is charged to the credential that made it.
    pub fn usage(&self) -> Usage {
        match self {
            Self::AuthFailure(_) => Usage::AuthFailure,
            Self::QuotaExceeded(_) => Usage::QuotaExceeded,
            Self::NoResults => Usage::Success,
            Self::TransientNetwork(_) | Self::MalformedResponse(_) => Usage::Failure,
        }
    }
}

/// Failure to turn a candidate reference into image bytes. These reject the
/// candidate, never the provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("not an image: content-type {0:?}")]
    ContentType(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("download timed out")]
    Timeout,

    #[error("undecodable image: {0}")]
    Undecodable(String),

    #[error("image larger than {0} bytes")]
    TooLarge(u64),
}

impl FetchError {
    /// Short rejection reason for outcome records.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ContentType(_) => "content-type",
            Self::Download(_) => "download",
            Self::Timeout => "timeout",
            Self::Undecodable(_) => "undecodable",
            Self::TooLarge(_) => "max-bytes",
        }
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A search hit before its bytes are fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRef {
    pub provider: ProviderKind,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<ImageFormat>,
    pub title: Option<String>,
}

impl CandidateRef {
    pub fn new(provider: ProviderKind, url: impl Into<String>) -> Self {
        Self {
            provider,
            url: url.into(),
            width: None,
            height: None,
            format: None,
            title: None,
        }
    }
}

/// A fetched candidate image.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: ProviderKind,
    pub source_url: String,
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    pub format: Option<ImageFormat>,
    pub bytes: Bytes,
    /// Hex SHA-256 of `bytes`.
    pub content_hash: String,
}

impl Candidate {
    pub fn new(
        reference: &CandidateRef,
        width: u32,
        height: u32,
        format: Option<ImageFormat>,
        bytes: Bytes,
    ) -> Self {
        Self {
            provider: reference.provider,
            source_url: reference.url.clone(),
            width,
            height,
            byte_size: bytes.len() as u64,
            format,
            content_hash: crate::dedup::content_hash(&bytes),
            bytes,
        }
    }
}

/// Downloads the bytes behind a candidate reference.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, reference: &CandidateRef) -> Result<Candidate, FetchError>;
}

/// One step of a [`CandidateStream`].
#[derive(Debug)]
pub struct Fetched {
    pub reference: CandidateRef,
    pub result: Result<Candidate, FetchError>,
}

/// Finite, lazily fetched sequence of candidates from one search.
///
/// Restarting means searching again.
pub struct CandidateStream {
    pending: VecDeque<CandidateRef>,
    fetcher: Arc<dyn ImageFetcher>,
    timeout: Duration,
}

impl CandidateStream {
    pub fn new(
        mut refs: Vec<CandidateRef>,
        max_results: usize,
        fetcher: Arc<dyn ImageFetcher>,
        timeout: Duration,
    ) -> Self {
        refs.truncate(max_results);
        Self {
            pending: refs.into(),
            fetcher,
            timeout,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fetch the next candidate, or `None` when the sequence is exhausted.
    pub async fn next(&mut self) -> Option<Fetched> {
        let reference = self.pending.pop_front()?;
        let result = match tokio::time::timeout(self.timeout, self.fetcher.fetch(&reference)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };
        Some(Fetched { reference, result })
    }
}

// ---------------------------------------------------------------------------
// Provider capability
// ---------------------------------------------------------------------------

/// Search capability shared by every provider.
#[async_trait]
pub trait ImageSearch: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Run one search. An empty result set is `Err(NoResults)`.
    async fn search(
        &self,
        query: &SearchQuery,
        credential: &Credential,
        marketplace: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<CandidateRef>, ProviderError>;
}

/// The concrete providers.
pub enum ProviderClient {
    Amazon(AmazonClient),
    Google(GoogleClient),
    Bing(BingClient),
}

#[async_trait]
impl ImageSearch for ProviderClient {
    fn kind(&self) -> ProviderKind {
        match self {
            Self::Amazon(_) => ProviderKind::Amazon,
            Self::Google(_) => ProviderKind::Google,
            Self::Bing(_) => ProviderKind::Bing,
        }
    }

    async fn search(
        &self,
        query: &SearchQuery,
        credential: &Credential,
        marketplace: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<CandidateRef>, ProviderError> {
        match self {
            Self::Amazon(c) => c.search(query, credential, marketplace, max_results).await,
            Self::Google(c) => c.search(query, credential, marketplace, max_results).await,
            Self::Bing(c) => c.search(query, credential, marketplace, max_results).await,
        }
    }
}

/// Build the client for a configured provider.
pub fn create_client(config: &ProviderConfig, http: HttpClient) -> ProviderClient {
    let base_url = config.base_url.clone();
    match config.kind {
        ProviderKind::Amazon => ProviderClient::Amazon(AmazonClient::new(http, base_url)),
        ProviderKind::Google => ProviderClient::Google(GoogleClient::new(http, base_url)),
        ProviderKind::Bing => ProviderClient::Bing(BingClient::new(http, base_url)),
    }
}
