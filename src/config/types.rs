use imagefetch_common::{ImageFormat, ProviderKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Enabled providers in fallback order: ascending priority, ties kept in
    /// file order.
    pub fn provider_chain(&self) -> Vec<&ProviderConfig> {
        let mut chain: Vec<_> = self.providers.iter().filter(|p| p.enabled).collect();
        chain.sort_by_key(|p| p.priority);
        chain
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Worker pool size.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Items selected per daily run.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: usize,

    /// Reprocess items that already have an image.
    #[serde(default)]
    pub force_update: bool,

    /// Dry run: cap the item count and never write images.
    #[serde(default)]
    pub test_mode: bool,

    #[serde(default = "default_test_item_limit")]
    pub test_item_limit: usize,

    /// Upper bound on any single provider search or image download.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Candidate downloads per second across the whole process.
    #[serde(default = "default_downloads_per_second")]
    pub downloads_per_second: u32,
}

fn default_concurrency() -> usize {
    4
}
fn default_daily_limit() -> usize {
    50
}
fn default_test_item_limit() -> usize {
    10
}
fn default_request_timeout() -> u64 {
    30
}
fn default_downloads_per_second() -> u32 {
    5
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            daily_limit: default_daily_limit(),
            force_update: false,
            test_mode: false,
            test_item_limit: default_test_item_limit(),
            request_timeout_secs: default_request_timeout(),
            downloads_per_second: default_downloads_per_second(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QualityConfig {
    #[serde(default = "default_min_width")]
    pub min_width: u32,

    #[serde(default = "default_min_height")]
    pub min_height: u32,

    #[serde(default = "default_max_image_size_mb")]
    pub max_image_size_mb: f64,

    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<ImageFormat>,

    #[serde(default = "default_reject_watermarked")]
    pub reject_watermarked: bool,

    /// Hosts whose images are treated as watermarked. Empty keeps the
    /// built-in stock-photo list.
    #[serde(default)]
    pub watermark_domains: Vec<String>,
}

fn default_min_width() -> u32 {
    800
}
fn default_min_height() -> u32 {
    600
}
fn default_max_image_size_mb() -> f64 {
    5.0
}
fn default_allowed_formats() -> Vec<ImageFormat> {
    vec![ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Webp]
}
fn default_reject_watermarked() -> bool {
    true
}

impl QualityConfig {
    pub fn max_bytes(&self) -> u64 {
        (self.max_image_size_mb * 1024.0 * 1024.0) as u64
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_width: default_min_width(),
            min_height: default_min_height(),
            max_image_size_mb: default_max_image_size_mb(),
            allowed_formats: default_allowed_formats(),
            reject_watermarked: default_reject_watermarked(),
            watermark_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Local retries for transient network errors, per provider call.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_transient_retries() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transient_retries: default_transient_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Hour of day (UTC) at which daily counters reset.
    #[serde(default)]
    pub reset_hour_utc: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("imagefetch.db")
}
fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            image_dir: default_image_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Outcome records buffered between workers and the writer task.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_retention_days() -> u32 {
    30
}
fn default_channel_capacity() -> usize {
    256
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Lower is tried first.
    #[serde(default)]
    pub priority: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Marketplace or region code, e.g. "US", "DE".
    #[serde(default)]
    pub marketplace: Option<String>,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_requests_per_day")]
    pub requests_per_day: u32,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Override the API endpoint (used by tests and proxies).
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

fn default_enabled() -> bool {
    true
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_requests_per_day() -> u32 {
    1000
}
fn default_max_results() -> usize {
    5
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            priority: 0,
            enabled: true,
            marketplace: None,
            requests_per_minute: default_requests_per_minute(),
            requests_per_day: default_requests_per_day(),
            max_results: default_max_results(),
            base_url: None,
            credentials: Vec::new(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct CredentialConfig {
    pub id: String,

    /// API key or access key. `env:NAME` reads it from the environment.
    pub key: String,

    /// Secret key (Amazon).
    #[serde(default)]
    pub secret: Option<String>,

    /// Partner tag (Amazon) or search engine id (Google).
    #[serde(default)]
    pub tag: Option<String>,

    #[serde(default = "default_daily_quota")]
    pub daily_quota: u32,
}

fn default_daily_quota() -> u32 {
    100
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("tag", &self.tag)
            .field("daily_quota", &self.daily_quota)
            .finish()
    }
}
