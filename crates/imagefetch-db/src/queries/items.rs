//! Catalog item queries.
//!
//! Item selection for the different job kinds plus the mutable
//! has-image flag and last-outcome pointer.

use chrono::{DateTime, Utc};
use imagefetch_common::{Error, ItemId, ItemStatus, Result};
use rusqlite::Connection;

use super::{fmt_ts, parse_col, parse_opt_col, parse_opt_ts};
use crate::models::Item;

const ITEM_COLUMNS: &str = "id, sku, ean, upc, mpn, name, category, auto_fetch, has_image, last_status, last_attempt_at";

/// Parse an item from a row selected with `ITEM_COLUMNS`.
fn parse_item_row(row: &rusqlite::Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: parse_col(row, 0)?,
        sku: row.get(1)?,
        ean: row.get(2)?,
        upc: row.get(3)?,
        mpn: row.get(4)?,
        name: row.get(5)?,
        category: row.get(6)?,
        auto_fetch: row.get(7)?,
        has_image: row.get(8)?,
        last_status: parse_opt_col(row, 9)?,
        last_attempt_at: parse_opt_ts(row, 10)?,
    })
}

fn collect_items(
    conn: &Connection,
    sql: &str,
    params: &[(&str, &dyn rusqlite::ToSql)],
) -> Result<Vec<Item>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::database(e.to_string()))?;

    let items = stmt
        .query_map(params, parse_item_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(items)
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

/// Insert an item, or update its identifiers and flags if it already exists.
///
/// The last-outcome pointer is left untouched on update.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `item` - Item to upsert
///
/// # Returns
///
/// * `Ok(())` - If the operation succeeded
/// * `Err(Error)` - If a database error occurs
pub fn upsert_item(conn: &Connection, item: &Item) -> Result<()> {
    conn.execute(
        "INSERT INTO items (id, sku, ean, upc, mpn, name, category, auto_fetch, has_image)
         VALUES (:id, :sku, :ean, :upc, :mpn, :name, :category, :auto_fetch, :has_image)
         ON CONFLICT(id) DO UPDATE SET
            sku = :sku,
            ean = :ean,
            upc = :upc,
            mpn = :mpn,
            name = :name,
            category = :category,
            auto_fetch = :auto_fetch,
            has_image = :has_image",
        rusqlite::named_params! {
            ":id": item.id.to_string(),
            ":sku": &item.sku,
            ":ean": &item.ean,
            ":upc": &item.upc,
            ":mpn": &item.mpn,
            ":name": &item.name,
            ":category": &item.category,
            ":auto_fetch": item.auto_fetch,
            ":has_image": item.has_image,
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Get an item by ID.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `id` - Item ID
///
/// # Returns
///
/// * `Ok(Some(Item))` - The item if found
/// * `Ok(None)` - If the item does not exist
/// * `Err(Error)` - If a database error occurs
pub fn get_item(conn: &Connection, id: ItemId) -> Result<Option<Item>> {
    let result = conn.query_row(
        &format!("SELECT {} FROM items WHERE id = :id", ITEM_COLUMNS),
        rusqlite::named_params! { ":id": id.to_string() },
        parse_item_row,
    );

    match result {
        Ok(item) => Ok(Some(item)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get several items by ID, preserving the requested order.
///
/// Unknown IDs are skipped; callers compare lengths to detect them.
pub fn get_items(conn: &Connection, ids: &[ItemId]) -> Result<Vec<Item>> {
    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(item) = get_item(conn, *id)? {
            items.push(item);
        }
    }
    Ok(items)
}

/// List auto-fetch items that need an image.
///
/// With `force` set, items that already have an image are included too.
/// Never-attempted items come first, then the least recently attempted.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `force` - Include items that already have an image
/// * `limit` - Maximum number of items to return, or `None` for all
///
/// # Returns
///
/// * `Ok(Vec<Item>)` - Matching items in selection order
/// * `Err(Error)` - If a database error occurs
pub fn list_items_needing_images(
    conn: &Connection,
    force: bool,
    limit: Option<usize>,
) -> Result<Vec<Item>> {
    let sql = format!(
        "SELECT {} FROM items
         WHERE auto_fetch = 1 AND (:force OR has_image = 0)
         ORDER BY last_attempt_at IS NOT NULL, last_attempt_at, created_at, id
         LIMIT :limit",
        ITEM_COLUMNS
    );
    collect_items(
        conn,
        &sql,
        rusqlite::named_params! { ":force": force, ":limit": sql_limit(limit) },
    )
}

/// List items still lacking an image whose last outcome was a retryable failure.
pub fn list_retry_candidates(conn: &Connection, limit: Option<usize>) -> Result<Vec<Item>> {
    let statuses = ItemStatus::all()
        .iter()
        .filter(|s| s.is_retryable_failure())
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "SELECT {} FROM items
         WHERE has_image = 0 AND last_status IN ({})
         ORDER BY last_attempt_at, id
         LIMIT :limit",
        ITEM_COLUMNS, statuses
    );
    collect_items(
        conn,
        &sql,
        rusqlite::named_params! { ":limit": sql_limit(limit) },
    )
}

/// Whether the item currently has an image.
///
/// # Returns
///
/// * `Ok(bool)` - The has-image flag
/// * `Err(Error)` - If the item does not exist or a database error occurs
pub fn has_image(conn: &Connection, id: ItemId) -> Result<bool> {
    let result = conn.query_row(
        "SELECT has_image FROM items WHERE id = :id",
        rusqlite::named_params! { ":id": id.to_string() },
        |row| row.get::<_, bool>(0),
    );

    match result {
        Ok(flag) => Ok(flag),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(Error::not_found(format!("item {}", id)))
        }
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Set the has-image flag.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `id` - Item ID
/// * `has_image` - New flag value
///
/// # Returns
///
/// * `Ok(())` - If the item was updated
/// * `Err(Error)` - `NotFound` if the item does not exist
pub fn set_has_image(conn: &Connection, id: ItemId, has_image: bool) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE items SET has_image = :has_image WHERE id = :id",
            rusqlite::named_params! { ":id": id.to_string(), ":has_image": has_image },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if changed == 0 {
        return Err(Error::not_found(format!("item {}", id)));
    }
    Ok(())
}

/// Move the item's last-outcome pointer.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `id` - Item ID
/// * `status` - Terminal status of the latest run
/// * `at` - When the outcome was recorded
pub fn set_last_outcome(
    conn: &Connection,
    id: ItemId,
    status: ItemStatus,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE items SET last_status = :status, last_attempt_at = :at WHERE id = :id",
        rusqlite::named_params! {
            ":id": id.to_string(),
            ":status": status.to_string(),
            ":at": fmt_ts(at),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Count items in the catalog.
pub fn count_items(conn: &Connection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get::<_, i64>(0))
        .map(|n| n as u64)
        .map_err(|e| Error::database(e.to_string()))
}

/// Count auto-fetch items without an image.
pub fn count_missing_images(conn: &Connection) -> Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM items WHERE has_image = 0 AND auto_fetch = 1",
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as u64)
    .map_err(|e| Error::database(e.to_string()))
}

/// Count items grouped by their last outcome. Never-attempted items are not included.
pub fn count_by_last_status(conn: &Connection) -> Result<Vec<(ItemStatus, u64)>> {
    let mut stmt = conn
        .prepare(
            "SELECT last_status, COUNT(*) FROM items
             WHERE last_status IS NOT NULL
             GROUP BY last_status
             ORDER BY last_status",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((parse_col::<ItemStatus>(row, 0)?, row.get::<_, i64>(1)? as u64))
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows)
}
