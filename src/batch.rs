//! Batch runner: selects items, fans them out to the orchestrator under a
//! fixed-size worker pool and aggregates their outcomes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use imagefetch_common::{Error, ItemId, ItemStatus, JobKind, Result, RunId};
use imagefetch_db::models::Item;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::AuditSink;
use crate::catalog::Catalog;
use crate::config::BatchConfig;
use crate::orchestrator::{Orchestrator, OutcomeRecord, RunContext};

/// Which items a run processes. Every source shares the same pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// Items still needing an image, at most `limit` of them.
    Daily { limit: usize },
    /// Every auto-fetch item needing an image.
    Backfill,
    /// Explicit item ids, in order. Unknown ids are skipped.
    Manual(Vec<ItemId>),
    /// Items still lacking an image whose last outcome was a failure.
    RetryFailed,
}

impl ItemSource {
    pub fn job_kind(&self) -> JobKind {
        match self {
            Self::Daily { .. } => JobKind::Daily,
            Self::Backfill => JobKind::Backfill,
            Self::Manual(_) => JobKind::Manual,
            Self::RetryFailed => JobKind::RetryFailed,
        }
    }

    fn select(&self, catalog: &dyn Catalog, force: bool, cap: Option<usize>) -> Result<Vec<Item>> {
        let mut items = match self {
            Self::Daily { limit } => {
                let limit = cap.map_or(*limit, |c| c.min(*limit));
                catalog.list_items_needing_images(force, Some(limit))?
            }
            Self::Backfill => catalog.list_items_needing_images(force, cap)?,
            Self::Manual(ids) => catalog.get_items(ids)?,
            Self::RetryFailed => catalog.list_retry_candidates(cap)?,
        };
        if let Some(cap) = cap {
            items.truncate(cap);
        }
        Ok(items)
    }
}

/// Run-level knobs.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub concurrency: usize,
    pub force_update: bool,
    /// Dry run. Caps the item count at `test_item_limit` and never stores.
    pub test_mode: bool,
    pub test_item_limit: usize,
}

impl From<&BatchConfig> for BatchSettings {
    fn from(config: &BatchConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            force_update: config.force_update,
            test_mode: config.test_mode,
            test_item_limit: config.test_item_limit,
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

/// Result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: RunId,
    pub job_kind: JobKind,
    pub selected: usize,
    pub dispatched: usize,
    pub counts: BTreeMap<ItemStatus, usize>,
    /// Workers that died without producing a record.
    pub crashed: usize,
    pub cancelled: bool,
    pub dry_run: bool,
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub outcomes: Vec<OutcomeRecord>,
}

impl BatchSummary {
    fn new(run_id: RunId, job_kind: JobKind, dry_run: bool) -> Self {
        Self {
            run_id,
            job_kind,
            selected: 0,
            dispatched: 0,
            counts: BTreeMap::new(),
            crashed: 0,
            cancelled: false,
            dry_run,
            elapsed_ms: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Sum of the per-status counts.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    fn record(&mut self, outcome: OutcomeRecord) {
        *self.counts.entry(outcome.status).or_insert(0) += 1;
        self.outcomes.push(outcome);
    }
}

pub struct BatchRunner {
    orchestrator: Arc<Orchestrator>,
    audit: Arc<dyn AuditSink>,
    settings: BatchSettings,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        audit: Arc<dyn AuditSink>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            orchestrator,
            audit,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops dispatching new items when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Process every selected item and wait for in-flight ones to finish.
    ///
    /// Only configuration problems and a failed item selection are errors;
    /// item-level failures end up in the summary.
    pub async fn run(&self, source: ItemSource) -> Result<BatchSummary> {
        if self.settings.concurrency == 0 {
            return Err(Error::configuration("batch concurrency must be at least 1"));
        }

        let started = Instant::now();
        let ctx = RunContext {
            run_id: RunId::new(),
            job_kind: source.job_kind(),
            force_update: self.settings.force_update,
            dry_run: self.settings.test_mode,
        };
        let mut summary = BatchSummary::new(ctx.run_id, ctx.job_kind, ctx.dry_run);

        let cap = self
            .settings
            .test_mode
            .then_some(self.settings.test_item_limit);
        let force = self.settings.force_update;
        let items = self
            .orchestrator
            .on_catalog(move |catalog| source.select(catalog, force, cap))
            .await?;
        summary.selected = items.len();

        if let Err(e) = self.orchestrator.load_dedup_index().await {
            warn!(error = %e, "Failed to load stored image hashes, dedup starts empty");
        }

        info!(
            run_id = %ctx.run_id,
            job = %ctx.job_kind,
            items = items.len(),
            concurrency = self.settings.concurrency,
            dry_run = ctx.dry_run,
            "Starting batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut workers = JoinSet::new();

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let orchestrator = Arc::clone(&self.orchestrator);
            let audit = Arc::clone(&self.audit);
            summary.dispatched += 1;
            workers.spawn(async move {
                let record = orchestrator.process(&item, &ctx).await;
                drop(permit);
                if let Err(e) = audit.append(record.clone()).await {
                    warn!(item_id = %record.item_id, error = %e, "Failed to append outcome to audit log");
                }
                record
            });

            // Keep finished workers from piling up on large runs.
            while let Some(joined) = workers.try_join_next() {
                collect(&mut summary, joined);
            }
        }

        if summary.cancelled {
            info!(
                run_id = %ctx.run_id,
                dispatched = summary.dispatched,
                remaining = summary.selected - summary.dispatched,
                "Batch cancelled, waiting for in-flight items"
            );
        }

        while let Some(joined) = workers.join_next().await {
            collect(&mut summary, joined);
        }

        if let Err(e) = self.audit.flush().await {
            warn!(run_id = %ctx.run_id, error = %e, "Failed to flush audit log");
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            run_id = %ctx.run_id,
            dispatched = summary.dispatched,
            success = summary.count(ItemStatus::Success),
            no_match = summary.count(ItemStatus::NoMatch),
            failed = summary.count(ItemStatus::AllProvidersFailed),
            rate_limited = summary.count(ItemStatus::RateLimited),
            elapsed_ms = summary.elapsed_ms,
            "Batch finished"
        );
        Ok(summary)
    }
}

fn collect(
    summary: &mut BatchSummary,
    joined: std::result::Result<OutcomeRecord, tokio::task::JoinError>,
) {
    match joined {
        Ok(record) => {
            debug!(item_id = %record.item_id, status = %record.status, "Collected outcome");
            summary.record(record);
        }
        Err(e) => {
            error!(error = %e, "Batch worker crashed");
            summary.crashed += 1;
        }
    }
}
