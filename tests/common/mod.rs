//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which wires an in-memory catalog, a temporary
//! image directory, a [`ManualClock`] and a scripted [`StubFetcher`], plus
//! [`StubSearch`] providers whose answers and call counts tests control.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;

use imagefetch::catalog::{Catalog, SqliteCatalog};
use imagefetch::clock::ManualClock;
use imagefetch::credentials::Credential;
use imagefetch::images::ImageStorage;
use imagefetch::orchestrator::{Orchestrator, ProviderSlot};
use imagefetch::providers::{
    Candidate, CandidateRef, FetchError, ImageFetcher, ImageSearch, ProviderError, SearchQuery,
};
use imagefetch::quality::{DomainDenylist, QualityGate, QualityPolicy};
use imagefetch::rate_limit::RateLimit;
use imagefetch_common::{ImageFormat, ProviderKind};
use imagefetch_db::models::Item;
use imagefetch_db::pool::{get_conn, init_memory_pool, DbPool};
use imagefetch_db::queries::items;

// ---------------------------------------------------------------------------
// Stub provider
// ---------------------------------------------------------------------------

/// A provider that answers every search with the same scripted result.
pub struct StubSearch {
    kind: ProviderKind,
    response: Mutex<Result<Vec<CandidateRef>, ProviderError>>,
    delay: Duration,
    echo: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl StubSearch {
    pub fn returning(kind: ProviderKind, urls: &[&str]) -> Arc<Self> {
        let refs = urls.iter().map(|u| CandidateRef::new(kind, *u)).collect();
        Self::with_response(kind, Ok(refs), Duration::ZERO)
    }

    pub fn failing(kind: ProviderKind, error: ProviderError) -> Arc<Self> {
        Self::with_response(kind, Err(error), Duration::ZERO)
    }

    pub fn slow(kind: ProviderKind, delay: Duration) -> Arc<Self> {
        Self::with_response(kind, Err(ProviderError::NoResults), delay)
    }

    pub fn slow_returning(kind: ProviderKind, urls: &[&str], delay: Duration) -> Arc<Self> {
        let refs = urls.iter().map(|u| CandidateRef::new(kind, *u)).collect();
        Self::with_response(kind, Ok(refs), delay)
    }

    fn with_response(
        kind: ProviderKind,
        response: Result<Vec<CandidateRef>, ProviderError>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            response: Mutex::new(response),
            delay,
            echo: false,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        })
    }

    /// Answers every query with the single image at [`echo_url`] of the
    /// query text.
    pub fn echo(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            response: Mutex::new(Err(ProviderError::NoResults)),
            delay: Duration::ZERO,
            echo: true,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn set_response(&self, response: Result<Vec<CandidateRef>, ProviderError>) {
        *self.response.lock() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of searches that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl ImageSearch for StubSearch {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn search(
        &self,
        query: &SearchQuery,
        _credential: &Credential,
        _marketplace: Option<&str>,
        _max_results: usize,
    ) -> Result<Vec<CandidateRef>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.text.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.echo {
            return Ok(vec![CandidateRef::new(self.kind, echo_url(&query.text))]);
        }
        self.response.lock().clone()
    }
}

/// Image URL an echoing stub returns for a query.
pub fn echo_url(query: &str) -> String {
    format!("https://cdn.test/{}.jpg", query.to_lowercase().replace(' ', "-"))
}

// ---------------------------------------------------------------------------
// Stub fetcher
// ---------------------------------------------------------------------------

/// Image "downloads" served from memory. Unknown URLs fail to download.
#[derive(Default)]
pub struct StubFetcher {
    images: Mutex<HashMap<String, (u32, u32, Option<ImageFormat>, Bytes)>>,
    fetched: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn add(&self, url: &str, width: u32, height: u32, format: ImageFormat, bytes: &[u8]) {
        self.images.lock().insert(
            url.to_string(),
            (width, height, Some(format), Bytes::copy_from_slice(bytes)),
        );
    }

    /// Register an image whose bytes are derived from its URL.
    pub fn add_unique(&self, url: &str, width: u32, height: u32, format: ImageFormat) {
        self.add(url, width, height, format, url.as_bytes());
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn fetch(&self, reference: &CandidateRef) -> Result<Candidate, FetchError> {
        self.fetched.lock().push(reference.url.clone());
        let entry = self.images.lock().get(&reference.url).cloned();
        match entry {
            Some((width, height, format, bytes)) => {
                Ok(Candidate::new(reference, width, height, format, bytes))
            }
            None => Err(FetchError::Download(format!("404 for {}", reference.url))),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Policy used throughout: min 800x600, JPEG or PNG, at most 3 MB.
pub fn test_policy() -> QualityPolicy {
    QualityPolicy {
        min_width: 800,
        min_height: 600,
        max_bytes: 3 * 1024 * 1024,
        allowed_formats: HashSet::from([ImageFormat::Jpeg, ImageFormat::Png]),
        reject_watermarked: true,
    }
}

pub fn credential(id: &str) -> Credential {
    Credential {
        id: id.to_string(),
        key: format!("{}-key", id),
        secret: Some(format!("{}-secret", id)),
        tag: Some(format!("{}-tag", id)),
    }
}

pub fn generous_limit() -> RateLimit {
    RateLimit {
        per_minute: 1000,
        per_day: 100_000,
    }
}

pub struct TestHarness {
    pub db: DbPool,
    pub catalog: Arc<SqliteCatalog>,
    pub clock: Arc<ManualClock>,
    pub fetcher: Arc<StubFetcher>,
    pub images: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        let images = tempfile::tempdir().expect("failed to create image dir");
        let catalog = Arc::new(SqliteCatalog::new(
            db.clone(),
            ImageStorage::new(images.path().to_path_buf()),
        ));
        Self {
            db,
            catalog,
            clock: Arc::new(ManualClock::at_noon()),
            fetcher: Arc::new(StubFetcher::default()),
            images,
        }
    }

    /// An orchestrator over this harness with no providers yet.
    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with_catalog(self.catalog.clone())
    }

    pub fn orchestrator_with_catalog(&self, catalog: Arc<dyn Catalog>) -> Orchestrator {
        Orchestrator::new(
            catalog,
            self.fetcher.clone(),
            QualityGate::new(test_policy(), Arc::new(DomainDenylist::default())),
            self.clock.clone(),
            0,
        )
    }

    pub fn add_item(&self, item: Item) -> Item {
        let conn = get_conn(&self.db).expect("failed to get connection");
        items::upsert_item(&conn, &item).expect("failed to insert item");
        item
    }

    pub fn add_named(&self, name: &str) -> Item {
        self.add_item(Item::named(name))
    }

    pub fn item(&self, item: &Item) -> Item {
        let conn = get_conn(&self.db).expect("failed to get connection");
        items::get_item(&conn, item.id)
            .expect("failed to load item")
            .expect("item missing")
    }
}

/// Append a stub provider with one credential of the given daily quota.
pub fn add_stub(
    orchestrator: &mut Orchestrator,
    search: &Arc<StubSearch>,
    limit: RateLimit,
    quota: u32,
) {
    let id = format!("{}-1", search.kind());
    orchestrator.add_provider(
        ProviderSlot::new(search.clone(), 5),
        limit,
        vec![(credential(&id), quota)],
    );
}
