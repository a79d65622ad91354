//! Append-only audit log of per-item outcomes.
//!
//! Workers hand finished [`OutcomeRecord`]s to an [`AuditSink`]. The SQLite
//! sink buffers them on a bounded channel and writes them from a single
//! background task, so database latency never stalls the worker pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use imagefetch_common::{Error, ProviderKind, Result};
use imagefetch_db::pool::{get_conn, DbPool};
use imagefetch_db::queries::outcomes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::orchestrator::OutcomeRecord;

/// Receiver of one outcome record per processed item.
///
/// Records from concurrent workers arrive in arbitrary order.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: OutcomeRecord) -> Result<()>;

    /// Wait until every record appended so far has been written.
    async fn flush(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SQLite sink
// ---------------------------------------------------------------------------

enum AuditCommand {
    Append(Box<OutcomeRecord>),
    Flush(oneshot::Sender<()>),
}

/// Writes outcome rows to the `outcomes` table from a background task.
///
/// The writer runs until every handle is dropped.
pub struct SqliteAuditSink {
    sender: mpsc::Sender<AuditCommand>,
}

impl SqliteAuditSink {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `pool` - Database pool the writer appends outcome rows through.
    /// * `capacity` - Bound of the channel between workers and the writer.
    ///   Workers wait for space once it fills.
    pub fn new(pool: DbPool, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        tokio::spawn(write_records(receiver, pool));
        Self { sender }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn append(&self, record: OutcomeRecord) -> Result<()> {
        self.sender
            .send(AuditCommand::Append(Box::new(record)))
            .await
            .map_err(|_| Error::internal("Audit writer is closed"))
    }

    async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(AuditCommand::Flush(done))
            .await
            .map_err(|_| Error::internal("Audit writer is closed"))?;
        wait.await
            .map_err(|_| Error::internal("Audit writer stopped before flushing"))
    }
}

async fn write_records(mut receiver: mpsc::Receiver<AuditCommand>, pool: DbPool) {
    debug!("Audit writer started");
    let mut written = 0u64;

    while let Some(command) = receiver.recv().await {
        match command {
            AuditCommand::Append(record) => {
                let (item_id, run_id) = (record.item_id, record.run_id);
                let pool = pool.clone();
                let result = tokio::task::spawn_blocking(move || write_record(&pool, &record))
                    .await
                    .map_err(|e| Error::internal(format!("audit write task failed: {}", e)))
                    .and_then(|r| r);
                match result {
                    Ok(()) => written += 1,
                    Err(e) => {
                        warn!(item_id = %item_id, run_id = %run_id, error = %e, "Failed to write outcome record");
                    }
                }
            }
            AuditCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!(written, "Audit writer stopped");
}

fn write_record(pool: &DbPool, record: &OutcomeRecord) -> Result<()> {
    let row = record.to_row()?;
    let conn = get_conn(pool)?;
    outcomes::insert_outcome(&conn, &row)
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// Keeps records in memory. Used for dry runs without a database and in
/// tests.
#[derive(Default, Clone)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<OutcomeRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: OutcomeRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Delete outcome records older than `retention_days`. Zero keeps
/// everything.
pub fn prune_audit_log(pool: &DbPool, retention_days: u32, now: DateTime<Utc>) -> Result<usize> {
    if retention_days == 0 {
        return Ok(0);
    }
    let cutoff = now - Duration::days(i64::from(retention_days));
    let conn = get_conn(pool)?;
    let removed = outcomes::prune_outcomes_before(&conn, cutoff)?;
    if removed > 0 {
        info!(removed, retention_days, "Pruned audit log");
    }
    Ok(removed)
}

/// Provider calls per credential logged since `since`.
///
/// Credential quotas live in memory, so a new process reloads the current
/// period's usage from the log before dispatching anything.
pub fn credential_usage_since(
    pool: &DbPool,
    since: DateTime<Utc>,
) -> Result<BTreeMap<(ProviderKind, String), u32>> {
    let conn = get_conn(pool)?;
    let rows = outcomes::list_outcomes_since(&conn, since)?;
    drop(conn);

    let mut usage = BTreeMap::new();
    for row in &rows {
        let record = match OutcomeRecord::from_row(row) {
            Ok(record) => record,
            Err(e) => {
                warn!(item_id = %row.item_id, error = %e, "Skipping unreadable outcome record");
                continue;
            }
        };
        for attempt in record.attempts {
            if attempt.query.is_none() {
                continue;
            }
            if let Some(credential) = attempt.credential {
                *usage.entry((attempt.provider, credential)).or_insert(0u32) += 1;
            }
        }
    }
    Ok(usage)
}
