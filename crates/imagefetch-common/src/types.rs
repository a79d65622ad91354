//! Core type definitions for providers, image formats, jobs and outcomes.
//!
//! All enums serialize in snake_case and round-trip through `Display` /
//! `FromStr` so they can be stored as plain TEXT columns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// External image-search provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Amazon Product Advertising API (exact identifier lookups).
    Amazon,
    /// Google Custom Search, image mode.
    Google,
    /// Bing Image Search.
    Bing,
}

impl ProviderKind {
    /// Whether this provider can look items up by EAN/UPC directly.
    pub fn supports_identifier_lookup(&self) -> bool {
        matches!(self, Self::Amazon)
    }

    /// All provider kinds in declaration order.
    pub fn all() -> &'static [ProviderKind] {
        &[Self::Amazon, Self::Google, Self::Bing]
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amazon => write!(f, "amazon"),
            Self::Google => write!(f, "google"),
            Self::Bing => write!(f, "bing"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amazon" => Ok(Self::Amazon),
            "google" => Ok(Self::Google),
            "bing" => Ok(Self::Bing),
            _ => Err(format!("Invalid provider kind: {}", s)),
        }
    }
}

/// Image container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
    Bmp,
}

impl ImageFormat {
    /// Parse a MIME type such as `image/jpeg; charset=binary`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::Webp),
            "image/gif" => Some(Self::Gif),
            "image/bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Guess a format from a URL or file path extension.
    pub fn from_extension(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        let ext = path.rsplit_once('.')?.1;
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Canonical file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
        }
    }

    /// MIME type used when handing bytes to storage.
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => write!(f, "jpeg"),
            Self::Png => write!(f, "png"),
            Self::Webp => write!(f, "webp"),
            Self::Gif => write!(f, "gif"),
            Self::Bmp => write!(f, "bmp"),
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::Webp),
            "gif" => Ok(Self::Gif),
            "bmp" => Ok(Self::Bmp),
            _ => Err(format!("Invalid image format: {}", s)),
        }
    }
}

/// Final status of one item in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// A candidate was accepted and stored.
    Success,
    /// Providers answered but no candidate passed validation.
    NoMatch,
    /// Every provider errored or was unavailable.
    AllProvidersFailed,
    /// Every provider was denied by rate or quota budgets.
    RateLimited,
    /// Every candidate seen was a duplicate of an already stored image.
    SkippedDuplicate,
    /// The item already had an image and the run was not forced.
    SkippedHasImage,
    /// An accepted candidate could not be written by the storage collaborator.
    PersistenceFailed,
}

impl ItemStatus {
    /// Every status, in reporting order.
    pub fn all() -> &'static [ItemStatus] {
        &[
            Self::Success,
            Self::NoMatch,
            Self::AllProvidersFailed,
            Self::RateLimited,
            Self::SkippedDuplicate,
            Self::SkippedHasImage,
            Self::PersistenceFailed,
        ]
    }

    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Statuses a retry-failed job picks up again.
    pub fn is_retryable_failure(&self) -> bool {
        matches!(
            self,
            Self::NoMatch | Self::AllProvidersFailed | Self::RateLimited | Self::PersistenceFailed
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::NoMatch => "no_match",
            Self::AllProvidersFailed => "all_providers_failed",
            Self::RateLimited => "rate_limited",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::SkippedHasImage => "skipped_has_image",
            Self::PersistenceFailed => "persistence_failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|status| status.to_string() == s)
            .ok_or_else(|| format!("Invalid item status: {}", s))
    }
}

/// Result of trying one provider for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// A candidate from this provider was accepted.
    Success,
    /// Candidates were returned but none passed validation.
    NoMatch,
    /// The provider answered with an empty result set.
    NoResults,
    /// Rate token or credential quota denied; no network call was made.
    RateLimited,
    /// Every credential for the provider is disabled.
    Unavailable,
    /// The provider rejected the credential.
    AuthFailure,
    /// The provider answered 429 or equivalent.
    QuotaExceeded,
    /// Network failure after local retries, including timeouts.
    NetworkError,
    /// The response could not be decoded.
    MalformedResponse,
}

impl ProviderStatus {
    /// Whether the provider produced an answer (as opposed to failing or being skipped).
    pub fn answered(&self) -> bool {
        matches!(self, Self::Success | Self::NoMatch | Self::NoResults)
    }

    /// Whether the provider was skipped by a rate or quota gate.
    pub fn budget_denied(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::NoMatch => "no_match",
            Self::NoResults => "no_results",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::AuthFailure => "auth_failure",
            Self::QuotaExceeded => "quota_exceeded",
            Self::NetworkError => "network_error",
            Self::MalformedResponse => "malformed_response",
        };
        f.write_str(s)
    }
}

/// What selected the items of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Recurring delta over newly eligible items.
    Daily,
    /// One-time pass over the whole catalog.
    Backfill,
    /// Explicit list of items.
    Manual,
    /// Items whose last outcome was a retryable failure.
    RetryFailed,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Backfill => write!(f, "backfill"),
            Self::Manual => write!(f, "manual"),
            Self::RetryFailed => write!(f, "retry_failed"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "backfill" => Ok(Self::Backfill),
            "manual" => Ok(Self::Manual),
            "retry_failed" | "retry-failed" => Ok(Self::RetryFailed),
            _ => Err(format!("Invalid job kind: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_serialization() {
        let json = serde_json::to_string(&ProviderKind::Amazon).unwrap();
        assert_eq!(json, r#""amazon""#);

        let kind: ProviderKind = serde_json::from_str(r#""bing""#).unwrap();
        assert_eq!(kind, ProviderKind::Bing);
    }

    #[test]
    fn test_provider_kind_from_str_is_case_insensitive() {
        assert_eq!("GOOGLE".parse::<ProviderKind>().unwrap(), ProviderKind::Google);
        assert!("yahoo".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_identifier_lookup_support() {
        assert!(ProviderKind::Amazon.supports_identifier_lookup());
        assert!(!ProviderKind::Google.supports_identifier_lookup());
        assert!(!ProviderKind::Bing.supports_identifier_lookup());
    }

    #[test]
    fn test_image_format_from_mime() {
        assert_eq!(ImageFormat::from_mime("image/jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(
            ImageFormat::from_mime("image/PNG; charset=binary"),
            Some(ImageFormat::Png)
        );
        assert_eq!(ImageFormat::from_mime("text/html"), None);
    }

    #[test]
    fn test_image_format_from_extension() {
        assert_eq!(
            ImageFormat::from_extension("https://cdn.example.com/a/b.JPG?w=800"),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(ImageFormat::from_extension("photo.webp"), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::from_extension("https://example.com/image"), None);
    }

    #[test]
    fn test_item_status_round_trip() {
        for status in ItemStatus::all() {
            let parsed: ItemStatus = status.to_string().parse().unwrap();
            assert_eq!(*status, parsed);
        }
        assert!("bogus".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_item_status_serde_matches_display() {
        let json = serde_json::to_string(&ItemStatus::AllProvidersFailed).unwrap();
        assert_eq!(json, r#""all_providers_failed""#);
    }

    #[test]
    fn test_retryable_failures() {
        assert!(ItemStatus::NoMatch.is_retryable_failure());
        assert!(ItemStatus::RateLimited.is_retryable_failure());
        assert!(!ItemStatus::Success.is_retryable_failure());
        assert!(!ItemStatus::SkippedHasImage.is_retryable_failure());
        assert!(!ItemStatus::SkippedDuplicate.is_retryable_failure());
    }

    #[test]
    fn test_provider_status_classification() {
        assert!(ProviderStatus::NoResults.answered());
        assert!(!ProviderStatus::AuthFailure.answered());
        assert!(ProviderStatus::RateLimited.budget_denied());
        assert!(!ProviderStatus::QuotaExceeded.budget_denied());
    }

    #[test]
    fn test_job_kind_parse() {
        assert_eq!("retry-failed".parse::<JobKind>().unwrap(), JobKind::RetryFailed);
        assert_eq!(JobKind::Backfill.to_string(), "backfill");
    }
}
