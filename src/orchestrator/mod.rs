//! Per-item acquisition workflow.
//!
//! Each item walks an explicit state machine:
//!
//! ```text
//! CheckingEligibility -> TryingProvider(p) -> Validating(p) -> Accepted
//!                              ^                   |              |
//!                              +-- NextProvider <--+              v
//!                                                           Terminal(status)
//! ```
//!
//! A provider that answered an identifier query without an acceptable
//! candidate gets one more search with the simplified item name
//! (`FallbackSearch(p)`) before the chain moves on. Every search, fallback
//! included, is only made after both a credential lease and a rate token
//! were granted. Provider and candidate failures advance the chain; only
//! the end of the chain (or an accepted candidate) terminates the item, and
//! every item ends with exactly one [`OutcomeRecord`].

mod outcome;

pub use outcome::{ChosenCandidate, OutcomeRecord, ProviderAttempt, Rejection, DUPLICATE_REASON};

use std::sync::Arc;
use std::time::{Duration, Instant};

use imagefetch_common::{
    Error, ImageFormat, ItemStatus, JobKind, ProviderKind, ProviderStatus, Result, RunId,
};
use imagefetch_db::models::Item;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ImageMetadata};
use crate::clock::Clock;
use crate::config::{validate_config, Config};
use crate::credentials::{Credential, CredentialPool, NoneAvailable, Usage};
use crate::dedup::DedupIndex;
use crate::providers::{
    build_query, create_client, fallback_query, Candidate, CandidateStream, Fetched, HttpClient,
    HttpFetcher, ImageFetcher, ImageSearch, ProviderError, QueryKind, RetryPolicy,
};
use crate::quality::{quality_score, QualityGate};
use crate::rate_limit::{RateLimit, RateLimiter};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One provider in the fallback chain.
pub struct ProviderSlot {
    pub client: Arc<dyn ImageSearch>,
    pub marketplace: Option<String>,
    pub max_results: usize,
}

impl ProviderSlot {
    pub fn new(client: Arc<dyn ImageSearch>, max_results: usize) -> Self {
        Self {
            client,
            marketplace: None,
            max_results,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.client.kind()
    }
}

/// Run-wide settings every item shares.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub run_id: RunId,
    pub job_kind: JobKind,
    pub force_update: bool,
    /// Accept candidates without handing them to storage.
    pub dry_run: bool,
}

impl RunContext {
    pub fn new(job_kind: JobKind) -> Self {
        Self {
            run_id: RunId::new(),
            job_kind,
            force_update: false,
            dry_run: false,
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

enum ItemState {
    CheckingEligibility,
    TryingProvider(usize),
    FallbackSearch(usize),
    Validating {
        provider: usize,
        stream: CandidateStream,
    },
    /// `format` is the gate-verified format of `candidate`.
    Accepted {
        candidate: Candidate,
        format: ImageFormat,
    },
    NextProvider(usize),
    Terminal(ItemStatus),
}

/// Everything learned about one item while walking the chain.
#[derive(Default)]
struct Progress {
    attempts: Vec<ProviderAttempt>,
    chosen: Option<ChosenCandidate>,
    error: Option<String>,
    /// The current provider's search used an identifier query and has not
    /// been followed by a name search yet.
    fallback_due: bool,
}

impl Progress {
    fn current(&mut self) -> Option<&mut ProviderAttempt> {
        self.attempts.last_mut()
    }

    /// Final status once the chain is exhausted without an accept.
    fn exhausted_status(&self) -> ItemStatus {
        let rejections: Vec<&Rejection> =
            self.attempts.iter().flat_map(|a| a.rejections.iter()).collect();
        if !rejections.is_empty() && rejections.iter().all(|r| r.is_duplicate()) {
            return ItemStatus::SkippedDuplicate;
        }
        if self.attempts.iter().any(|a| a.status.answered()) {
            return ItemStatus::NoMatch;
        }
        if !self.attempts.is_empty() && self.attempts.iter().all(|a| a.status.budget_denied()) {
            return ItemStatus::RateLimited;
        }
        ItemStatus::AllProvidersFailed
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    providers: Vec<ProviderSlot>,
    credentials: Arc<CredentialPool>,
    rate_limiter: Arc<RateLimiter>,
    gate: QualityGate,
    dedup: Arc<DedupIndex>,
    fetcher: Arc<dyn ImageFetcher>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    search_timeout: Duration,
    download_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        fetcher: Arc<dyn ImageFetcher>,
        gate: QualityGate,
        clock: Arc<dyn Clock>,
        reset_hour: u32,
    ) -> Self {
        Self {
            providers: Vec::new(),
            credentials: Arc::new(CredentialPool::new(reset_hour)),
            rate_limiter: Arc::new(RateLimiter::new(reset_hour)),
            gate,
            dedup: Arc::new(DedupIndex::new()),
            fetcher,
            catalog,
            clock,
            search_timeout: DEFAULT_REQUEST_TIMEOUT,
            download_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Build the full production wiring from configuration.
    pub fn from_config(
        config: &Config,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_config(config)?;

        let request_timeout = Duration::from_secs(config.batch.request_timeout_secs);
        let retry = RetryPolicy::new(&config.retry);
        let search_timeout = search_budget(request_timeout, &retry);
        let http = HttpClient::new(request_timeout, retry)?;
        let fetcher = Arc::new(HttpFetcher::new(
            &http,
            config.batch.downloads_per_second,
            config.quality.max_bytes(),
        ));

        let mut orchestrator = Self::new(
            catalog,
            fetcher,
            QualityGate::from_config(&config.quality),
            clock,
            config.quota.reset_hour_utc,
        )
        .with_timeouts(search_timeout, request_timeout);

        for provider in config.provider_chain() {
            let slot = ProviderSlot {
                client: Arc::new(create_client(provider, http.clone())),
                marketplace: provider.marketplace.clone(),
                max_results: provider.max_results,
            };
            let limit = RateLimit {
                per_minute: provider.requests_per_minute,
                per_day: provider.requests_per_day,
            };
            let credentials = provider
                .credentials
                .iter()
                .map(|c| (Credential::from(c), c.daily_quota))
                .collect();
            orchestrator.add_provider(slot, limit, credentials);
        }

        Ok(orchestrator)
    }

    /// Bound a provider search (retries included) and a candidate download.
    pub fn with_timeouts(mut self, search: Duration, download: Duration) -> Self {
        self.search_timeout = search;
        self.download_timeout = download;
        self
    }

    /// Append a provider to the end of the fallback chain.
    pub fn add_provider(
        &mut self,
        slot: ProviderSlot,
        limit: RateLimit,
        credentials: Vec<(Credential, u32)>,
    ) {
        let kind = slot.kind();
        let now = self.clock.now();
        self.rate_limiter.register(kind, limit, now);
        for (credential, quota) in credentials {
            self.credentials.add(kind, credential, quota, now);
        }
        self.providers.push(slot);
    }

    pub fn provider_chain(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(ProviderSlot::kind).collect()
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.credentials
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn dedup(&self) -> &Arc<DedupIndex> {
        &self.dedup
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Run a catalog call on the blocking pool. Catalog implementations do
    /// synchronous database and filesystem work.
    pub async fn on_catalog<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Catalog) -> Result<T> + Send + 'static,
    {
        let catalog = Arc::clone(&self.catalog);
        tokio::task::spawn_blocking(move || call(catalog.as_ref()))
            .await
            .map_err(|e| Error::internal(format!("catalog task failed: {}", e)))?
    }

    /// Seed the dedup index with every stored image hash.
    pub async fn load_dedup_index(&self) -> Result<usize> {
        let hashes = self.on_catalog(|catalog| catalog.known_hashes()).await?;
        let count = hashes.len();
        for (hash, owner) in hashes {
            self.dedup.record(&hash, owner);
        }
        debug!(hashes = count, "Loaded dedup index");
        Ok(count)
    }

    /// Process one item to its terminal status.
    pub async fn process(&self, item: &Item, ctx: &RunContext) -> OutcomeRecord {
        let started = Instant::now();
        let timestamp = self.clock.now();
        let mut progress = Progress::default();
        let mut state = ItemState::CheckingEligibility;

        let status = loop {
            state = match state {
                ItemState::CheckingEligibility => self.check_eligibility(item, ctx).await,
                ItemState::TryingProvider(index) if index >= self.providers.len() => {
                    ItemState::Terminal(progress.exhausted_status())
                }
                ItemState::TryingProvider(index) => {
                    self.try_provider(index, item, &mut progress, false).await
                }
                ItemState::FallbackSearch(index) => {
                    self.try_provider(index, item, &mut progress, true).await
                }
                ItemState::Validating {
                    provider,
                    mut stream,
                } => match stream.next().await {
                    Some(fetched) => self.validate(provider, stream, fetched, item, &mut progress),
                    None => {
                        if let Some(attempt) = progress.current() {
                            attempt.status = ProviderStatus::NoMatch;
                        }
                        after_answer(provider, &mut progress)
                    }
                },
                ItemState::Accepted { candidate, format } => {
                    self.accept(candidate, format, item, ctx, &mut progress).await
                }
                ItemState::NextProvider(index) => ItemState::TryingProvider(index + 1),
                ItemState::Terminal(status) => break status,
            };
        };

        if !ctx.dry_run {
            let (item_id, at) = (item.id, self.clock.now());
            if let Err(e) = self
                .on_catalog(move |catalog| catalog.set_last_outcome(item_id, status, at))
                .await
            {
                warn!(item_id = %item.id, error = %e, "Failed to update last outcome");
            }
        }

        let record = OutcomeRecord {
            item_id: item.id,
            run_id: ctx.run_id,
            job_kind: ctx.job_kind,
            timestamp,
            status,
            attempts: progress.attempts,
            chosen: progress.chosen,
            error: progress.error,
            dry_run: ctx.dry_run,
            processing_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            item_id = %item.id,
            status = %record.status,
            providers_tried = record.attempts.len(),
            processing_ms = record.processing_ms,
            "Item processed"
        );
        record
    }

    async fn check_eligibility(&self, item: &Item, ctx: &RunContext) -> ItemState {
        if ctx.force_update {
            return ItemState::TryingProvider(0);
        }
        let item_id = item.id;
        let has_image = match self.on_catalog(move |catalog| catalog.has_image(item_id)).await {
            Ok(flag) => flag,
            Err(e) => {
                debug!(item_id = %item.id, error = %e, "Has-image lookup failed, using item flag");
                item.has_image
            }
        };
        if has_image {
            ItemState::Terminal(ItemStatus::SkippedHasImage)
        } else {
            ItemState::TryingProvider(0)
        }
    }

    async fn try_provider(
        &self,
        index: usize,
        item: &Item,
        progress: &mut Progress,
        fallback: bool,
    ) -> ItemState {
        let slot = &self.providers[index];
        let kind = slot.kind();
        progress.fallback_due = false;

        let query = if fallback {
            fallback_query(item)
        } else {
            build_query(item, kind)
        };
        let Some(query) = query else {
            if fallback {
                return ItemState::NextProvider(index);
            }
            progress.attempts.push(
                ProviderAttempt::new(kind, ProviderStatus::NoMatch)
                    .with_error("item has no searchable identifier"),
            );
            return ItemState::NextProvider(index);
        };

        let now = self.clock.now();
        let lease = match self.credentials.acquire(kind, now) {
            Ok(lease) => lease,
            Err(reason) => {
                let (status, detail) = match reason {
                    NoneAvailable::QuotaExhausted => {
                        (ProviderStatus::RateLimited, "credential quota exhausted")
                    }
                    NoneAvailable::AllDisabled => {
                        (ProviderStatus::Unavailable, "all credentials disabled")
                    }
                    NoneAvailable::NoCredentials => {
                        (ProviderStatus::Unavailable, "no credentials configured")
                    }
                };
                debug!(item_id = %item.id, provider = %kind, reason = detail, "Skipping provider");
                let mut attempt = ProviderAttempt::new(kind, status).with_error(detail);
                attempt.fallback = fallback;
                progress.attempts.push(attempt);
                return ItemState::NextProvider(index);
            }
        };

        if !self.rate_limiter.try_acquire(kind, now) {
            self.credentials.cancel(lease);
            let mut attempt = ProviderAttempt::new(kind, ProviderStatus::RateLimited)
                .with_error("rate limit reached");
            attempt.fallback = fallback;
            progress.attempts.push(attempt);
            return ItemState::NextProvider(index);
        }

        if fallback {
            debug!(item_id = %item.id, provider = %kind, query = %query.text, "Retrying provider with simplified name");
        }
        let mut attempt = ProviderAttempt::new(kind, ProviderStatus::Success);
        attempt.credential = Some(lease.credential().id.clone());
        attempt.query = Some(query.text.clone());
        attempt.fallback = fallback;
        progress.fallback_due = !fallback && query.kind != QueryKind::Name;

        let search = slot.client.search(
            &query,
            lease.credential(),
            slot.marketplace.as_deref(),
            slot.max_results,
        );
        let result = match tokio::time::timeout(self.search_timeout, search).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::TransientNetwork(format!(
                "search timed out after {}s",
                self.search_timeout.as_secs()
            ))),
        };

        match result {
            Ok(refs) => {
                self.credentials.release(lease, Usage::Success);
                debug!(item_id = %item.id, provider = %kind, results = refs.len(), "Search returned candidates");
                progress.attempts.push(attempt);
                ItemState::Validating {
                    provider: index,
                    stream: CandidateStream::new(
                        refs,
                        slot.max_results,
                        Arc::clone(&self.fetcher),
                        self.download_timeout,
                    ),
                }
            }
            Err(e) => {
                self.credentials.release(lease, e.usage());
                if matches!(e, ProviderError::AuthFailure(_)) {
                    warn!(item_id = %item.id, provider = %kind, error = %e, "Provider rejected credential");
                } else {
                    debug!(item_id = %item.id, provider = %kind, error = %e, "Provider search failed");
                }
                let answered = matches!(e, ProviderError::NoResults);
                attempt.status = e.status();
                attempt.error = Some(e.to_string());
                progress.attempts.push(attempt);
                if answered {
                    after_answer(index, progress)
                } else {
                    ItemState::NextProvider(index)
                }
            }
        }
    }

    fn validate(
        &self,
        provider: usize,
        stream: CandidateStream,
        fetched: Fetched,
        item: &Item,
        progress: &mut Progress,
    ) -> ItemState {
        let Some(attempt) = progress.current() else {
            return ItemState::NextProvider(provider);
        };
        attempt.candidates_tried += 1;

        let rejection = match fetched.result {
            Err(e) => Some(e.reason().to_string()),
            Ok(candidate) => match self.gate.evaluate(&candidate) {
                Err(reason) => Some(reason.to_string()),
                Ok(_) if !self.dedup.try_claim(&candidate.content_hash, item.id) => {
                    Some(DUPLICATE_REASON.to_string())
                }
                Ok(format) => {
                    return ItemState::Accepted { candidate, format }
                }
            },
        };

        if let Some(reason) = rejection {
            debug!(item_id = %item.id, url = %fetched.reference.url, reason = %reason, "Candidate rejected");
            attempt.rejections.push(Rejection {
                url: fetched.reference.url,
                reason,
            });
        }
        ItemState::Validating { provider, stream }
    }

    async fn accept(
        &self,
        candidate: Candidate,
        format: ImageFormat,
        item: &Item,
        ctx: &RunContext,
        progress: &mut Progress,
    ) -> ItemState {
        if let Some(attempt) = progress.current() {
            attempt.status = ProviderStatus::Success;
        }

        let metadata = ImageMetadata {
            provider: candidate.provider,
            source_url: candidate.source_url.clone(),
            width: candidate.width,
            height: candidate.height,
            format,
            byte_size: candidate.byte_size,
            content_hash: candidate.content_hash.clone(),
            quality_score: quality_score(candidate.width, candidate.height, Some(format)),
        };
        progress.chosen = Some(ChosenCandidate {
            provider: metadata.provider,
            source_url: metadata.source_url.clone(),
            width: metadata.width,
            height: metadata.height,
            format,
            byte_size: metadata.byte_size,
            content_hash: metadata.content_hash.clone(),
            quality_score: metadata.quality_score,
        });

        if ctx.dry_run {
            debug!(item_id = %item.id, url = %metadata.source_url, "Dry run, not storing accepted image");
            return ItemState::Terminal(ItemStatus::Success);
        }

        let (item_id, bytes, stored) = (item.id, candidate.bytes.clone(), metadata.clone());
        let result = self
            .on_catalog(move |catalog| catalog.store_image(item_id, &bytes, &stored))
            .await;
        match result {
            Ok(()) => ItemState::Terminal(ItemStatus::Success),
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "Failed to store accepted image");
                self.dedup.release(&candidate.content_hash, item.id);
                progress.error = Some(e.to_string());
                ItemState::Terminal(ItemStatus::PersistenceFailed)
            }
        }
    }
}

/// Where to go once a provider answered without an acceptable candidate.
fn after_answer(index: usize, progress: &mut Progress) -> ItemState {
    if std::mem::take(&mut progress.fallback_due) {
        ItemState::FallbackSearch(index)
    } else {
        ItemState::NextProvider(index)
    }
}

/// Upper bound for one provider search including its local retries.
fn search_budget(request_timeout: Duration, retry: &RetryPolicy) -> Duration {
    let attempts = retry.max_retries + 1;
    let backoff: Duration = (0..retry.max_retries).map(|n| retry.backoff(n)).sum();
    request_timeout * attempts + backoff
}
