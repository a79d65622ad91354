//! Stored image queries.
//!
//! The `images` table doubles as the persistent dedup index: its
//! `content_hash` column is unique across the whole catalog.

use imagefetch_common::{Error, ItemId, Result};
use rusqlite::Connection;

use super::{fmt_ts, parse_col, parse_ts};
use crate::models::StoredImage;

const IMAGE_COLUMNS: &str = "item_id, content_hash, provider, source_url, width, height, format, byte_size, quality_score, path, created_at";

fn parse_image_row(row: &rusqlite::Row) -> rusqlite::Result<StoredImage> {
    Ok(StoredImage {
        item_id: parse_col(row, 0)?,
        content_hash: row.get(1)?,
        provider: parse_col(row, 2)?,
        source_url: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        format: parse_col(row, 6)?,
        byte_size: row.get::<_, i64>(7)? as u64,
        quality_score: row.get(8)?,
        path: row.get(9)?,
        created_at: parse_ts(row, 10)?,
    })
}

/// Record a stored image and flag its item as having one, atomically.
///
/// Fails if the content hash is already present.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `image` - Stored image row to insert
///
/// # Returns
///
/// * `Ok(())` - If the image was recorded
/// * `Err(Error)` - If the hash already exists, the item is missing, or a database error occurs
pub fn insert_image(conn: &Connection, image: &StoredImage) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    tx.execute(
        &format!(
            "INSERT INTO images ({}) VALUES (:item_id, :content_hash, :provider, :source_url, :width, :height, :format, :byte_size, :quality_score, :path, :created_at)",
            IMAGE_COLUMNS
        ),
        rusqlite::named_params! {
            ":item_id": image.item_id.to_string(),
            ":content_hash": &image.content_hash,
            ":provider": image.provider.to_string(),
            ":source_url": &image.source_url,
            ":width": image.width,
            ":height": image.height,
            ":format": image.format.to_string(),
            ":byte_size": image.byte_size as i64,
            ":quality_score": image.quality_score,
            ":path": &image.path,
            ":created_at": fmt_ts(image.created_at),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    tx.execute(
        "UPDATE items SET has_image = 1 WHERE id = :id",
        rusqlite::named_params! { ":id": image.item_id.to_string() },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Every stored content hash with the item that owns it.
pub fn list_hashes(conn: &Connection) -> Result<Vec<(String, ItemId)>> {
    let mut stmt = conn
        .prepare("SELECT content_hash, item_id FROM images")
        .map_err(|e| Error::database(e.to_string()))?;

    let hashes = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, parse_col(row, 1)?)))
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(hashes)
}

/// Look up a stored image by content hash.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `content_hash` - Hex SHA-256 of the image bytes
///
/// # Returns
///
/// * `Ok(Some(StoredImage))` - The image if found
/// * `Ok(None)` - If no image has this hash
/// * `Err(Error)` - If a database error occurs
pub fn find_by_hash(conn: &Connection, content_hash: &str) -> Result<Option<StoredImage>> {
    let result = conn.query_row(
        &format!(
            "SELECT {} FROM images WHERE content_hash = :hash",
            IMAGE_COLUMNS
        ),
        rusqlite::named_params! { ":hash": content_hash },
        parse_image_row,
    );

    match result {
        Ok(image) => Ok(Some(image)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// All images stored for an item, oldest first.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `item_id` - Item ID
pub fn get_images_for_item(conn: &Connection, item_id: ItemId) -> Result<Vec<StoredImage>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM images WHERE item_id = :item_id ORDER BY id",
            IMAGE_COLUMNS
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let images = stmt
        .query_map(
            rusqlite::named_params! { ":item_id": item_id.to_string() },
            parse_image_row,
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;
    use crate::pool::init_memory_pool;
    use crate::queries::items;
    use chrono::{TimeZone, Utc};
    use imagefetch_common::{ImageFormat, ProviderKind};

    fn sample_image(item_id: ItemId, hash: &str) -> StoredImage {
        StoredImage {
            item_id,
            content_hash: hash.to_string(),
            provider: ProviderKind::Google,
            source_url: "https://img.example.com/a.jpg".to_string(),
            width: 1000,
            height: 1000,
            format: ImageFormat::Jpeg,
            byte_size: 200 * 1024,
            quality_score: 80,
            path: format!("{}/{}.jpg", item_id, hash),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_insert_image_sets_has_image() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let item = Item::named("Widget");
        items::upsert_item(&conn, &item).unwrap();

        let image = sample_image(item.id, "0123456789abcdef");
        insert_image(&conn, &image).unwrap();

        assert!(items::has_image(&conn, item.id).unwrap());
        assert_eq!(get_images_for_item(&conn, item.id).unwrap(), vec![image.clone()]);
        assert_eq!(
            find_by_hash(&conn, "0123456789abcdef").unwrap(),
            Some(image)
        );
    }

    #[test]
    fn test_duplicate_hash_rolls_back() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let first = Item::named("A");
        let second = Item::named("B");
        items::upsert_item(&conn, &first).unwrap();
        items::upsert_item(&conn, &second).unwrap();

        insert_image(&conn, &sample_image(first.id, "samehash")).unwrap();
        let err = insert_image(&conn, &sample_image(second.id, "samehash")).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(!items::has_image(&conn, second.id).unwrap());
    }

    #[test]
    fn test_list_hashes() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let item = Item::named("A");
        items::upsert_item(&conn, &item).unwrap();
        insert_image(&conn, &sample_image(item.id, "h1")).unwrap();

        assert_eq!(
            list_hashes(&conn).unwrap(),
            vec![("h1".to_string(), item.id)]
        );
    }
}
