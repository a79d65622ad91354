//! Rust models matching the database schema.

use chrono::{DateTime, Utc};
use imagefetch_common::{ImageFormat, ItemId, ItemStatus, JobKind, ProviderKind, RunId};
use serde::{Deserialize, Serialize};

/// Catalog item as the acquisition pipeline sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub sku: Option<String>,
    pub ean: Option<String>,
    pub upc: Option<String>,
    pub mpn: Option<String>,
    pub name: String,
    pub category: Option<String>,
    pub auto_fetch: bool,
    pub has_image: bool,
    pub last_status: Option<ItemStatus>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl Item {
    /// A fresh auto-fetch item with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(),
            sku: None,
            ean: None,
            upc: None,
            mpn: None,
            name: name.into(),
            category: None,
            auto_fetch: true,
            has_image: false,
            last_status: None,
            last_attempt_at: None,
        }
    }
}

/// An image accepted for an item and written to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredImage {
    pub item_id: ItemId,
    pub content_hash: String,
    pub provider: ProviderKind,
    pub source_url: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub byte_size: u64,
    pub quality_score: u8,
    /// Path relative to the configured image directory.
    pub path: String,
    pub created_at: DateTime<Utc>,
}

/// One row of the outcome log. `record` holds the full serialized
/// outcome; the other columns are indexed projections of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRow {
    pub run_id: RunId,
    pub item_id: ItemId,
    pub job_kind: JobKind,
    pub status: ItemStatus,
    pub dry_run: bool,
    pub processing_ms: u64,
    pub record: String,
    pub created_at: DateTime<Utc>,
}
