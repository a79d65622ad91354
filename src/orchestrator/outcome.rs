//! Outcome records: the single audit entry for one item in one run.

use chrono::{DateTime, Utc};
use imagefetch_common::{Error, ImageFormat, ItemId, ItemStatus, JobKind, ProviderKind, ProviderStatus, Result, RunId};
use imagefetch_db::models::OutcomeRow;
use serde::{Deserialize, Serialize};

/// A candidate the item did not take, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub url: String,
    /// `format`, `max-bytes`, `min-dimensions`, `watermark`, `duplicate`,
    /// or a download failure such as `content-type`.
    pub reason: String,
}

pub const DUPLICATE_REASON: &str = "duplicate";

impl Rejection {
    pub fn is_duplicate(&self) -> bool {
        self.reason == DUPLICATE_REASON
    }
}

/// What happened with one provider in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: ProviderKind,
    pub status: ProviderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub candidates_tried: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<Rejection>,
    /// Second search of the same provider with the simplified item name.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

impl ProviderAttempt {
    pub fn new(provider: ProviderKind, status: ProviderStatus) -> Self {
        Self {
            provider,
            status,
            credential: None,
            query: None,
            error: None,
            candidates_tried: 0,
            rejections: Vec::new(),
            fallback: false,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Summary of the accepted candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenCandidate {
    pub provider: ProviderKind,
    pub source_url: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub byte_size: u64,
    pub content_hash: String,
    pub quality_score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub item_id: ItemId,
    pub run_id: RunId,
    pub job_kind: JobKind,
    pub timestamp: DateTime<Utc>,
    pub status: ItemStatus,
    /// Providers in the order they were tried.
    pub attempts: Vec<ProviderAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen: Option<ChosenCandidate>,
    /// Item-level failure detail, e.g. the storage error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub dry_run: bool,
    pub processing_ms: u64,
}

impl OutcomeRecord {
    pub fn attempt(&self, provider: ProviderKind) -> Option<&ProviderAttempt> {
        self.attempts.iter().find(|a| a.provider == provider)
    }

    /// Number of provider searches that actually went out. Only admitted
    /// searches carry a query.
    pub fn network_calls(&self) -> usize {
        self.attempts.iter().filter(|a| a.query.is_some()).count()
    }

    pub fn to_row(&self) -> Result<OutcomeRow> {
        let record = serde_json::to_string(self)
            .map_err(|e| Error::internal(format!("Failed to serialize outcome: {}", e)))?;
        Ok(OutcomeRow {
            run_id: self.run_id,
            item_id: self.item_id,
            job_kind: self.job_kind,
            status: self.status,
            dry_run: self.dry_run,
            processing_ms: self.processing_ms,
            record,
            created_at: self.timestamp,
        })
    }

    pub fn from_row(row: &OutcomeRow) -> Result<Self> {
        serde_json::from_str(&row.record)
            .map_err(|e| Error::internal(format!("Failed to parse outcome record: {}", e)))
    }
}
