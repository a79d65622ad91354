//! Database query modules.
//!
//! - items: catalog items, eligibility selection and last-outcome pointer
//! - images: stored images and the persistent content-hash index
//! - outcomes: append-only outcome log and retention pruning

pub mod images;
pub mod items;
pub mod outcomes;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use std::fmt::Display;
use std::str::FromStr;

/// Format a timestamp the way every table stores it. Fixed width, so
/// stored values compare correctly as text.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

/// Parse a TEXT column through `FromStr`.
pub(crate) fn parse_col<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: T::Err| conversion_error(idx, e.to_string()))
}

pub(crate) fn parse_opt_col<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| conversion_error(idx, e.to_string())),
        None => Ok(None),
    }
}

pub(crate) fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

pub(crate) fn parse_opt_ts(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, e.to_string())),
        None => Ok(None),
    }
}
