//! Application configuration.
//!
//! Settings load from `config.toml` under the user's config
//! directory, overridable through `GEEKSHELF_*` environment
//! variables. Heuristic tuning knobs (poll vote thresholds, batch
//! sizing, retry budgets) are deliberately exposed here rather than
//! hard-coded.

use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Directory name used under the platform config/cache directories.
pub const APP_DIR: &str = "geekshelf";

const DEFAULT_CONFIG: &str = r#"# geekshelf configuration

# Base URL of the BoardGameGeek XML API.
# api_base_url = "https://boardgamegeek.com/xmlapi2"

# Where the durable cache mirror lives. Defaults to the platform
# cache directory.
# cache_root = "/path/to/cache"

# Cache lifetimes (seconds).
# default_ttl_secs = 1800
# collection_ttl_secs = 3600
# stale_after_secs = 1800
# sweep_interval_secs = 300
# refresh_interval_secs = 1800

# Provider politeness.
# batch_size = 20
# batch_delay_ms = 1000
# max_retries = 3
# retry_backoff_ms = 1000
# retry_202_delay_ms = 3000

# Best-player-count poll qualification.
# min_poll_votes = 5
# poll_best_ratio = 1.5

# Result shaping.
# result_cap = 24
# debounce_ms = 500
"#;

/// Runtime configuration shared across the core subsystems.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base URL of the provider's XML API.
    pub api_base_url: String,
    /// Root directory for the durable cache mirror.
    pub cache_root: PathBuf,
    /// User-Agent header sent with every provider request.
    pub user_agent: String,
    /// TTL for non-collection cache entries, in seconds.
    pub default_ttl_secs: u64,
    /// TTL for cached collections, in seconds.
    pub collection_ttl_secs: u64,
    /// Age beyond which a cached collection counts as stale.
    pub stale_after_secs: u64,
    /// Interval between background sweeps of expired entries.
    pub sweep_interval_secs: u64,
    /// Interval between background staleness checks.
    pub refresh_interval_secs: u64,
    /// Delay before a newly observed username triggers a preload.
    pub debounce_ms: u64,
    /// Item ids per detail request.
    pub batch_size: usize,
    /// Pause between detail batches, in milliseconds.
    pub batch_delay_ms: u64,
    /// Retry budget for transport failures on a single call.
    pub max_retries: u32,
    /// Backoff between transport retries, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Wait after an HTTP 202 ("still processing") response.
    pub retry_202_delay_ms: u64,
    /// Minimum total votes before a poll bucket can qualify.
    pub min_poll_votes: u32,
    /// Required (best + recommended) / not-recommended ratio.
    pub poll_best_ratio: f64,
    /// Maximum number of games returned by a filter query.
    pub result_cap: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://boardgamegeek.com/xmlapi2".to_string(),
            cache_root: default_cache_root(),
            user_agent: "geekshelf/0.1".to_string(),
            default_ttl_secs: 30 * 60,
            collection_ttl_secs: 60 * 60,
            stale_after_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
            refresh_interval_secs: 30 * 60,
            debounce_ms: 500,
            batch_size: 20,
            batch_delay_ms: 1000,
            max_retries: 3,
            retry_backoff_ms: 1000,
            retry_202_delay_ms: 3000,
            min_poll_votes: 5,
            poll_best_ratio: 1.5,
            result_cap: 24,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path())
    }

    /// Load configuration from an explicit file path, falling back to
    /// defaults for anything unset.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        let defaults = AppConfig::default();
        let settings = config::Config::builder()
            .set_default("api_base_url", defaults.api_base_url.clone())?
            .set_default(
                "cache_root",
                defaults.cache_root.to_string_lossy().to_string(),
            )?
            .set_default("user_agent", defaults.user_agent.clone())?
            .set_default("default_ttl_secs", defaults.default_ttl_secs)?
            .set_default("collection_ttl_secs", defaults.collection_ttl_secs)?
            .set_default("stale_after_secs", defaults.stale_after_secs)?
            .set_default("sweep_interval_secs", defaults.sweep_interval_secs)?
            .set_default("refresh_interval_secs", defaults.refresh_interval_secs)?
            .set_default("debounce_ms", defaults.debounce_ms)?
            .set_default("batch_size", defaults.batch_size as u64)?
            .set_default("batch_delay_ms", defaults.batch_delay_ms)?
            .set_default("max_retries", defaults.max_retries as u64)?
            .set_default("retry_backoff_ms", defaults.retry_backoff_ms)?
            .set_default("retry_202_delay_ms", defaults.retry_202_delay_ms)?
            .set_default("min_poll_votes", defaults.min_poll_votes as u64)?
            .set_default("poll_best_ratio", defaults.poll_best_ratio)?
            .set_default("result_cap", defaults.result_cap as u64)?
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("GEEKSHELF"))
            .build()
            .context("failed to assemble configuration")?;

        settings
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    /// TTL applied to cached collections.
    pub fn collection_ttl(&self) -> Duration {
        Duration::from_secs(self.collection_ttl_secs)
    }

    /// Age beyond which a cached collection is refreshed.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Interval between expired-entry sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Interval between background staleness checks.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Delay between observing a username and preloading it.
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Pause inserted between detail batches.
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Backoff between transport-level retries.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Wait applied after an HTTP 202 response.
    pub fn retry_202_delay(&self) -> Duration {
        Duration::from_millis(self.retry_202_delay_ms)
    }
}

/// Write a commented default config file if none exists yet.
pub fn ensure_default_config() -> Result<PathBuf> {
    let path = config_path();
    if path.exists() {
        return Ok(path);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Location of the user's config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_documented_constants() {
        let config = AppConfig::default();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.min_poll_votes, 5);
        assert_eq!(config.poll_best_ratio, 1.5);
        assert_eq!(config.result_cap, 24);
        assert_eq!(config.collection_ttl_secs, 3600);
    }

    #[test]
    fn loads_overrides_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "batch_size = 5\nresult_cap = 10\n")?;

        let config = AppConfig::load_from(path)?;
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.result_cap, 10);
        // Unset keys keep their defaults.
        assert_eq!(config.max_retries, 3);
        Ok(())
    }
}
