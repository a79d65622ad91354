//! Candidate quality checks.
//!
//! [`QualityGate::evaluate`] runs its checks in a fixed order and reports the
//! first one that fails: format, byte size, dimensions, then the optional
//! watermark heuristic.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use imagefetch_common::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::config::QualityConfig;
use crate::providers::Candidate;

/// Stock-photo hosts whose previews are watermarked.
const DEFAULT_WATERMARK_DOMAINS: &[&str] = &[
    "shutterstock.com",
    "gettyimages.com",
    "istockphoto.com",
    "alamy.com",
    "dreamstime.com",
    "123rf.com",
    "depositphotos.com",
    "stock.adobe.com",
    "bigstockphoto.com",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityPolicy {
    pub min_width: u32,
    pub min_height: u32,
    pub max_bytes: u64,
    pub allowed_formats: HashSet<ImageFormat>,
    pub reject_watermarked: bool,
}

impl From<&QualityConfig> for QualityPolicy {
    fn from(config: &QualityConfig) -> Self {
        Self {
            min_width: config.min_width,
            min_height: config.min_height,
            max_bytes: config.max_bytes(),
            allowed_formats: config.allowed_formats.iter().copied().collect(),
            reject_watermarked: config.reject_watermarked,
        }
    }
}

/// Why a candidate was turned down by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    Format,
    MaxBytes,
    MinDimensions,
    Watermark,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::MaxBytes => "max-bytes",
            Self::MinDimensions => "min-dimensions",
            Self::Watermark => "watermark",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Watermark heuristics
// ---------------------------------------------------------------------------

/// Best-effort watermark detection. Implementations may be wrong in either
/// direction; the gate only consults them when the policy asks it to.
pub trait WatermarkDetector: Send + Sync {
    fn is_watermarked(&self, candidate: &Candidate) -> bool;
}

/// Flags candidates served from known stock-photo hosts.
#[derive(Debug, Clone)]
pub struct DomainDenylist {
    domains: Vec<String>,
}

impl DomainDenylist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.into().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Configured hosts, or the built-in list when none are configured.
    pub fn from_config(config: &QualityConfig) -> Self {
        if config.watermark_domains.is_empty() {
            Self::default()
        } else {
            Self::new(config.watermark_domains.iter().cloned())
        }
    }

    fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    }
}

impl Default for DomainDenylist {
    fn default() -> Self {
        Self::new(DEFAULT_WATERMARK_DOMAINS.iter().copied())
    }
}

impl WatermarkDetector for DomainDenylist {
    fn is_watermarked(&self, candidate: &Candidate) -> bool {
        reqwest::Url::parse(&candidate.source_url)
            .ok()
            .and_then(|url| url.host_str().map(|h| self.matches_host(h)))
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct QualityGate {
    policy: QualityPolicy,
    watermark: Arc<dyn WatermarkDetector>,
}

impl QualityGate {
    pub fn new(policy: QualityPolicy, watermark: Arc<dyn WatermarkDetector>) -> Self {
        Self { policy, watermark }
    }

    pub fn from_config(config: &QualityConfig) -> Self {
        Self::new(
            QualityPolicy::from(config),
            Arc::new(DomainDenylist::from_config(config)),
        )
    }

    pub fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    /// Check a candidate against the policy. On success returns the
    /// candidate's verified format.
    pub fn evaluate(&self, candidate: &Candidate) -> Result<ImageFormat, RejectReason> {
        let policy = &self.policy;

        let format = match candidate.format {
            Some(format) if policy.allowed_formats.contains(&format) => format,
            _ => return Err(RejectReason::Format),
        };
        if candidate.byte_size > policy.max_bytes {
            return Err(RejectReason::MaxBytes);
        }
        if candidate.width < policy.min_width || candidate.height < policy.min_height {
            return Err(RejectReason::MinDimensions);
        }
        if policy.reject_watermarked && self.watermark.is_watermarked(candidate) {
            return Err(RejectReason::Watermark);
        }
        Ok(format)
    }
}

/// Score an accepted image from 0 to 100: resolution up to 40, aspect ratio
/// up to 20, format up to 10.
pub fn quality_score(width: u32, height: u32, format: Option<ImageFormat>) -> u8 {
    let pixels = u64::from(width) * u64::from(height);
    let resolution = match pixels {
        p if p >= 1_000_000 => 40,
        p if p >= 500_000 => 30,
        p if p >= 200_000 => 20,
        _ => 10,
    };

    let aspect = if height == 0 {
        5
    } else {
        let ratio = f64::from(width) / f64::from(height);
        if (0.7..=1.5).contains(&ratio) {
            20
        } else if (0.5..=2.0).contains(&ratio) {
            15
        } else {
            5
        }
    };

    let format = match format {
        Some(ImageFormat::Jpeg | ImageFormat::Png) => 10,
        _ => 5,
    };

    resolution + aspect + format
}
