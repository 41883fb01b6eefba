//! Runtime configuration
//!
//! Provides configuration management with:
//! - Config file loading (optional, partial files fall back to defaults)
//! - Environment variable overrides
//! - Runtime defaults
//! - Validation
//!
//! The loaded [`Config`] is passed explicitly to whatever needs it.

use crate::aggregator::DEFAULT_CATEGORY_FILTER;
use crate::models::{SortDirection, SortField, SortSpec};
use crate::pricing::{PricingPolicy, DEFAULT_PRICE_API};
use crate::reports::DEFAULT_DATE_FORMAT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_INDEXER_ENDPOINT: &str = "https://bg-ponder-indexer-production.up.railway.app/graphql";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,

    /// GraphQL indexer connection
    pub indexer: IndexerConfig,

    /// Historical price lookups
    pub pricing: PricingConfig,

    pub aggregation: AggregationConfig,

    pub output: OutputConfig,

    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "ERROR".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub endpoint: String,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_INDEXER_ENDPOINT.to_string(),
            page_size: 1000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub enabled: bool,
    pub base_url: String,
    pub pacing_ms: u64,
    pub rate_limit_backoff_secs: u64,
    /// Unset retries rate-limited requests forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rate_limit_retries: Option<u32>,
    /// Dates looked up concurrently per batch.
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: DEFAULT_PRICE_API.to_string(),
            pacing_ms: 1500,
            rate_limit_backoff_secs: 60,
            max_rate_limit_retries: None,
            batch_size: 5,
            timeout_secs: 30,
        }
    }
}

impl PricingConfig {
    pub fn policy(&self) -> PricingPolicy {
        PricingPolicy {
            pacing: Duration::from_millis(self.pacing_ms),
            rate_limit_backoff: Duration::from_secs(self.rate_limit_backoff_secs),
            max_rate_limit_retries: self.max_rate_limit_retries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub category_filter: String,
    pub include_streams: bool,
    /// Window used when no dates are given on the command line, e.g. `"3m"` or `"2025"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_preset: Option<String>,
    pub sort: SortField,
    pub descending: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            category_filter: DEFAULT_CATEGORY_FILTER.to_string(),
            include_streams: false,
            default_preset: None,
            sort: SortField::Eth,
            descending: true,
        }
    }
}

impl AggregationConfig {
    pub fn sort_spec(&self) -> SortSpec {
        SortSpec {
            field: self.sort,
            direction: if self.descending {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub json_pretty: bool,
    /// strftime pattern for dates in CSV reports.
    pub date_format: String,
    pub reports_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_pretty: true,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub log_directory: PathBuf,
    /// TOML stream book replacing the built-in schedules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streams_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_directory: PathBuf::from("logs"),
            streams_file: None,
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and defaults
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let config_paths = [
            PathBuf::from("builder-ledger.toml"),
            PathBuf::from(".builder-ledger.toml"),
            dirs::config_dir()
                .map(|d| d.join("builder-ledger").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                info!(config_file = %path.display(), "Loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        if let Ok(val) = env::var("PONDER_API") {
            self.indexer.endpoint = val;
        }
        if let Ok(val) = env::var("BUILDER_LEDGER_PAGE_SIZE") {
            self.indexer.page_size = val.parse().context("Invalid BUILDER_LEDGER_PAGE_SIZE")?;
        }

        if let Ok(val) = env::var("BUILDER_LEDGER_PRICE_API") {
            self.pricing.base_url = val;
        }
        if let Ok(val) = env::var("BUILDER_LEDGER_PRICING_ENABLED") {
            self.pricing.enabled = val.parse().context("Invalid BUILDER_LEDGER_PRICING_ENABLED")?;
        }

        if let Ok(val) = env::var("BUILDER_LEDGER_STREAMS_FILE") {
            self.paths.streams_file = Some(PathBuf::from(val));
        }
        if let Ok(val) = env::var("BUILDER_LEDGER_LOG_DIR") {
            self.paths.log_directory = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.indexer.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Indexer endpoint must not be empty"));
        }

        if self.indexer.page_size == 0 || self.indexer.page_size > 1000 {
            return Err(anyhow::anyhow!(
                "Indexer page size must be between 1 and 1000, got {}",
                self.indexer.page_size
            ));
        }

        if self.pricing.batch_size == 0 {
            return Err(anyhow::anyhow!("Pricing batch size must be greater than 0"));
        }

        if self.pricing.pacing_ms < 500 {
            warn!(
                pacing_ms = self.pricing.pacing_ms,
                "Price request pacing is very short, expect rate limiting"
            );
        }

        if let Some(preset) = &self.aggregation.default_preset {
            preset
                .parse::<crate::models::DatePreset>()
                .with_context(|| format!("Invalid aggregation.default_preset '{preset}'"))?;
        }

        if self.logging.output != "console" && !self.paths.log_directory.exists() {
            fs::create_dir_all(&self.paths.log_directory).context("Failed to create log directory")?;
        }

        Ok(())
    }

    /// Save current configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, content).with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!(path = %path.display(), "Configuration saved to file");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "ERROR");
        assert_eq!(config.indexer.page_size, 1000);
        assert_eq!(config.pricing.pacing_ms, 1500);
        assert_eq!(config.aggregation.category_filter, "internal cohort");
        assert_eq!(config.aggregation.sort_spec(), SortSpec::default());
    }

    #[test]
    fn test_env_override() {
        env::set_var("BUILDER_LEDGER_PAGE_SIZE", "250");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.indexer.page_size, 250);
        env::remove_var("BUILDER_LEDGER_PAGE_SIZE");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.indexer.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aggregation.default_preset = Some("fortnight".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pricing_policy_from_config() {
        let mut config = Config::default();
        config.pricing.max_rate_limit_retries = Some(3);
        let policy = config.pricing.policy();
        assert_eq!(policy.pacing, Duration::from_millis(1500));
        assert_eq!(policy.rate_limit_backoff, Duration::from_secs(60));
        assert_eq!(policy.max_rate_limit_retries, Some(3));
    }
}
