mod types;

pub use types::*;

use anyhow::{Context, Result};
use imagefetch_common::{Error, ProviderKind};
use std::collections::HashSet;
use std::path::Path;

use crate::credentials::{CredentialStore, EnvCredentialStore};

/// Load configuration from a TOML file, resolving credential references
/// through the environment.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    resolve_credentials(&mut config, &EnvCredentialStore)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./imagefetch.toml",
        "~/.config/imagefetch/config.toml",
        "/etc/imagefetch/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Replace every credential key, secret and tag with the material the
/// store resolves it to.
pub fn resolve_credentials(
    config: &mut Config,
    store: &dyn CredentialStore,
) -> imagefetch_common::Result<()> {
    for provider in &mut config.providers {
        for cred in &mut provider.credentials {
            cred.key = store.resolve(&cred.key)?;
            if let Some(secret) = cred.secret.as_mut() {
                *secret = store.resolve(secret)?;
            }
            if let Some(tag) = cred.tag.as_mut() {
                *tag = store.resolve(tag)?;
            }
        }
    }
    Ok(())
}

/// Validate configuration. Every violation is a configuration error, which
/// aborts a run before any item is processed.
pub fn validate_config(config: &Config) -> imagefetch_common::Result<()> {
    if config.batch.concurrency == 0 {
        return Err(Error::configuration("batch.concurrency must be at least 1"));
    }
    if config.batch.test_mode && config.batch.test_item_limit == 0 {
        return Err(Error::configuration(
            "batch.test_item_limit must be at least 1 in test mode",
        ));
    }
    if config.batch.downloads_per_second == 0 {
        return Err(Error::configuration(
            "batch.downloads_per_second must be at least 1",
        ));
    }

    let quality = &config.quality;
    if quality.min_width == 0 || quality.min_height == 0 {
        return Err(Error::configuration(
            "quality.min_width and quality.min_height must be positive",
        ));
    }
    if quality.allowed_formats.is_empty() {
        return Err(Error::configuration(
            "quality.allowed_formats must not be empty",
        ));
    }
    if quality.max_image_size_mb <= 0.0 {
        return Err(Error::configuration(
            "quality.max_image_size_mb must be positive",
        ));
    }

    if config.quota.reset_hour_utc > 23 {
        return Err(Error::configuration(
            "quota.reset_hour_utc must be between 0 and 23",
        ));
    }

    let mut seen = HashSet::new();
    for provider in &config.providers {
        if !seen.insert(provider.kind) {
            return Err(Error::configuration(format!(
                "provider '{}' is configured more than once",
                provider.kind
            )));
        }
    }

    for provider in config.providers.iter().filter(|p| p.enabled) {
        let kind = provider.kind;
        if provider.credentials.is_empty() {
            return Err(Error::configuration(format!(
                "provider '{}' is enabled but has no credentials",
                kind
            )));
        }
        if provider.requests_per_minute == 0 || provider.requests_per_day == 0 {
            return Err(Error::configuration(format!(
                "provider '{}' rate limits must be positive",
                kind
            )));
        }
        if provider.max_results == 0 {
            return Err(Error::configuration(format!(
                "provider '{}' max_results must be positive",
                kind
            )));
        }

        for cred in &provider.credentials {
            if cred.key.trim().is_empty() {
                return Err(Error::configuration(format!(
                    "credential '{}' for '{}' has an empty key",
                    cred.id, kind
                )));
            }
            if cred.daily_quota == 0 {
                return Err(Error::configuration(format!(
                    "credential '{}' for '{}' has a zero daily quota",
                    cred.id, kind
                )));
            }
            match kind {
                ProviderKind::Amazon => {
                    if cred.secret.as_deref().map_or(true, str::is_empty)
                        || cred.tag.as_deref().map_or(true, str::is_empty)
                    {
                        return Err(Error::configuration(format!(
                            "amazon credential '{}' needs a secret and a partner tag",
                            cred.id
                        )));
                    }
                }
                ProviderKind::Google => {
                    if cred.tag.as_deref().map_or(true, str::is_empty) {
                        return Err(Error::configuration(format!(
                            "google credential '{}' needs a search engine id in `tag`",
                            cred.id
                        )));
                    }
                }
                ProviderKind::Bing => {}
            }
        }
    }

    if config.provider_chain().is_empty() {
        tracing::warn!("No providers enabled; every item will end as all_providers_failed");
    }

    Ok(())
}
