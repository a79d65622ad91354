//! Outcome log queries.
//!
//! Rows are only ever appended or pruned by age.

use chrono::{DateTime, Utc};
use imagefetch_common::{Error, ItemId, Result, RunId};
use rusqlite::Connection;

use super::{fmt_ts, parse_col, parse_ts};
use crate::models::OutcomeRow;

const OUTCOME_COLUMNS: &str =
    "run_id, item_id, job_kind, status, dry_run, processing_ms, record, created_at";

fn parse_outcome_row(row: &rusqlite::Row) -> rusqlite::Result<OutcomeRow> {
    Ok(OutcomeRow {
        run_id: parse_col(row, 0)?,
        item_id: parse_col(row, 1)?,
        job_kind: parse_col(row, 2)?,
        status: parse_col(row, 3)?,
        dry_run: row.get(4)?,
        processing_ms: row.get::<_, i64>(5)? as u64,
        record: row.get(6)?,
        created_at: parse_ts(row, 7)?,
    })
}

/// Append one outcome. A second row for the same (run, item) is rejected.
pub fn insert_outcome(conn: &Connection, outcome: &OutcomeRow) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO outcomes ({}) VALUES (:run_id, :item_id, :job_kind, :status, :dry_run, :processing_ms, :record, :created_at)",
            OUTCOME_COLUMNS
        ),
        rusqlite::named_params! {
            ":run_id": outcome.run_id.to_string(),
            ":item_id": outcome.item_id.to_string(),
            ":job_kind": outcome.job_kind.to_string(),
            ":status": outcome.status.to_string(),
            ":dry_run": outcome.dry_run,
            ":processing_ms": outcome.processing_ms as i64,
            ":record": &outcome.record,
            ":created_at": fmt_ts(outcome.created_at),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Append a batch of outcomes in one transaction.
pub fn insert_outcomes(conn: &Connection, outcomes: &[OutcomeRow]) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;
    for outcome in outcomes {
        insert_outcome(&tx, outcome)?;
    }
    tx.commit().map_err(|e| Error::database(e.to_string()))
}

/// All outcomes of one run, in insertion order.
pub fn list_outcomes_for_run(conn: &Connection, run_id: RunId) -> Result<Vec<OutcomeRow>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM outcomes WHERE run_id = :run_id ORDER BY id",
            OUTCOME_COLUMNS
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = stmt
        .query_map(
            rusqlite::named_params! { ":run_id": run_id.to_string() },
            parse_outcome_row,
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows)
}

/// Most recent outcome recorded for an item.
pub fn latest_outcome_for_item(conn: &Connection, item_id: ItemId) -> Result<Option<OutcomeRow>> {
    let result = conn.query_row(
        &format!(
            "SELECT {} FROM outcomes WHERE item_id = :item_id ORDER BY id DESC LIMIT 1",
            OUTCOME_COLUMNS
        ),
        rusqlite::named_params! { ":item_id": item_id.to_string() },
        parse_outcome_row,
    );

    match result {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Outcomes created at or after `since`, oldest first.
pub fn list_outcomes_since(conn: &Connection, since: DateTime<Utc>) -> Result<Vec<OutcomeRow>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM outcomes WHERE created_at >= :since ORDER BY id",
            OUTCOME_COLUMNS
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = stmt
        .query_map(
            rusqlite::named_params! { ":since": fmt_ts(since) },
            parse_outcome_row,
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows)
}

/// Delete outcomes created before `cutoff`. Returns the number removed.
pub fn prune_outcomes_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "DELETE FROM outcomes WHERE created_at < :cutoff",
        rusqlite::named_params! { ":cutoff": fmt_ts(cutoff) },
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Total number of logged outcomes.
pub fn count_outcomes(conn: &Connection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM outcomes", [], |row| row.get::<_, i64>(0))
        .map(|n| n as u64)
        .map_err(|e| Error::database(e.to_string()))
}
