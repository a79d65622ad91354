//! Catalog collaborator.
//!
//! The orchestrator only reads item identifiers, checks and sets the
//! has-image flag, and moves the last-outcome pointer. [`SqliteCatalog`]
//! backs that with the `imagefetch-db` tables and writes accepted image
//! bytes through [`ImageStorage`].

use chrono::{DateTime, Utc};
use imagefetch_common::{Error, ImageFormat, ItemId, ItemStatus, ProviderKind, Result};
use imagefetch_db::models::{Item, StoredImage};
use imagefetch_db::pool::{get_conn, DbPool};
use imagefetch_db::queries::{images, items};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::images::ImageStorage;

/// What storage needs to know about accepted bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub provider: ProviderKind,
    pub source_url: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub byte_size: u64,
    pub content_hash: String,
    pub quality_score: u8,
}

pub trait Catalog: Send + Sync {
    /// Auto-fetch items lacking an image (or all of them when `force`).
    fn list_items_needing_images(&self, force: bool, limit: Option<usize>) -> Result<Vec<Item>>;

    /// Items still lacking an image whose last outcome was a failure.
    fn list_retry_candidates(&self, limit: Option<usize>) -> Result<Vec<Item>>;

    /// Items by id, in order. Unknown ids are skipped.
    fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>>;

    fn has_image(&self, item_id: ItemId) -> Result<bool>;

    /// Persist accepted bytes. Failures are `Error::Persistence`.
    fn store_image(&self, item_id: ItemId, bytes: &[u8], metadata: &ImageMetadata) -> Result<()>;

    fn set_last_outcome(&self, item_id: ItemId, status: ItemStatus, at: DateTime<Utc>) -> Result<()>;

    /// `(content hash, owner)` for every stored image.
    fn known_hashes(&self) -> Result<Vec<(String, ItemId)>>;
}

/// One entry of an import file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImportItem {
    #[serde(default)]
    pub id: Option<ItemId>,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub ean: Option<String>,
    #[serde(default)]
    pub upc: Option<String>,
    #[serde(default)]
    pub mpn: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_auto_fetch")]
    pub auto_fetch: bool,
    #[serde(default)]
    pub has_image: bool,
}

fn default_auto_fetch() -> bool {
    true
}

impl From<ImportItem> for Item {
    fn from(import: ImportItem) -> Self {
        Item {
            id: import.id.unwrap_or_default(),
            sku: import.sku,
            ean: import.ean,
            upc: import.upc,
            mpn: import.mpn,
            name: import.name,
            category: import.category,
            auto_fetch: import.auto_fetch,
            has_image: import.has_image,
            last_status: None,
            last_attempt_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// Catalog backed by SQLite plus an image directory.
pub struct SqliteCatalog {
    pool: DbPool,
    storage: ImageStorage,
}

impl SqliteCatalog {
    pub fn new(pool: DbPool, storage: ImageStorage) -> Self {
        Self { pool, storage }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Insert or update items. Returns the number written.
    pub fn import(&self, entries: Vec<ImportItem>) -> Result<usize> {
        let conn = get_conn(&self.pool)?;
        let mut written = 0;
        for entry in entries {
            if entry.name.trim().is_empty() {
                warn!(sku = ?entry.sku, "Skipping import entry without a name");
                continue;
            }
            items::upsert_item(&conn, &Item::from(entry))?;
            written += 1;
        }
        Ok(written)
    }
}

impl Catalog for SqliteCatalog {
    fn list_items_needing_images(&self, force: bool, limit: Option<usize>) -> Result<Vec<Item>> {
        let conn = get_conn(&self.pool)?;
        items::list_items_needing_images(&conn, force, limit)
    }

    fn list_retry_candidates(&self, limit: Option<usize>) -> Result<Vec<Item>> {
        let conn = get_conn(&self.pool)?;
        items::list_retry_candidates(&conn, limit)
    }

    fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        let conn = get_conn(&self.pool)?;
        items::get_items(&conn, ids)
    }

    fn has_image(&self, item_id: ItemId) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        items::has_image(&conn, item_id)
    }

    fn store_image(&self, item_id: ItemId, bytes: &[u8], metadata: &ImageMetadata) -> Result<()> {
        let written = self
            .storage
            .write(&item_id, &metadata.content_hash, metadata.format, bytes)?;

        let record = StoredImage {
            item_id,
            content_hash: metadata.content_hash.clone(),
            provider: metadata.provider,
            source_url: metadata.source_url.clone(),
            width: metadata.width,
            height: metadata.height,
            format: metadata.format,
            byte_size: metadata.byte_size,
            quality_score: metadata.quality_score,
            path: written.path,
            created_at: Utc::now(),
        };

        let inserted = get_conn(&self.pool).and_then(|conn| images::insert_image(&conn, &record));
        if let Err(e) = inserted {
            // Leave no orphaned file behind a failed insert.
            if let Err(cleanup) = self
                .storage
                .delete(&item_id, &metadata.content_hash, metadata.format)
            {
                warn!(item_id = %item_id, error = %cleanup, "Failed to remove orphaned image file");
            }
            return Err(Error::persistence(e.to_string()));
        }

        debug!(item_id = %item_id, path = %record.path, "Stored image");
        Ok(())
    }

    fn set_last_outcome(&self, item_id: ItemId, status: ItemStatus, at: DateTime<Utc>) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        items::set_last_outcome(&conn, item_id, status, at)
    }

    fn known_hashes(&self) -> Result<Vec<(String, ItemId)>> {
        let conn = get_conn(&self.pool)?;
        images::list_hashes(&conn)
    }
}
