//! Configuration management.
//!
//! Settings come from an optional TOML file overlaid with `PATENT_HARVEST__*`
//! environment variables (double underscore between section and key).
//!
//! # Configuration File Format
//!
//! ```toml
//! [api]
//! endpoint = "https://api.lens.org/patent/search"
//! timeout_secs = 30
//!
//! [retrieval]
//! page_size = 100
//! keep_alive = "1m"
//! page_delay_ms = 1000
//! rate_limit_backoff_secs = 10
//! max_rate_limit_retries = 30
//! record_ceiling = 50000
//! include_raw_json = true
//!
//! [logging]
//! level = "info"
//! format = "plain"
//! ```
//!
//! The API token may be set as `[api] token`, but `LENS_API_TOKEN` is preferred.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::harvest::HarvestSettings;
use crate::sources::DEFAULT_ENDPOINT;
use crate::utils::RateLimitPolicy;

/// Environment variable holding the bearer token
pub const TOKEN_ENV_VAR: &str = "LENS_API_TOKEN";

/// Prefix for environment overrides, e.g. `PATENT_HARVEST__RETRIEVAL__PAGE_SIZE`
pub const ENV_PREFIX: &str = "PATENT_HARVEST";

const CONFIG_FILE_NAME: &str = "patent-harvest.toml";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bearer token; never written back out
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            token: None,
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Pagination and output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,

    /// Pause before each scroll request, in milliseconds
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,

    /// 0 retries forever
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    #[serde(default = "default_record_ceiling")]
    pub record_ceiling: u64,

    #[serde(default = "default_true")]
    pub include_raw_json: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            keep_alive: default_keep_alive(),
            page_delay_ms: default_page_delay_ms(),
            rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            record_ceiling: default_record_ceiling(),
            include_raw_json: true,
        }
    }
}

fn default_page_size() -> usize {
    100
}

fn default_keep_alive() -> String {
    "1m".to_string()
}

fn default_page_delay_ms() -> u64 {
    1000
}

fn default_rate_limit_backoff_secs() -> u64 {
    10
}

fn default_max_rate_limit_retries() -> u32 {
    30
}

fn default_record_ceiling() -> u64 {
    50_000
}

fn default_true() -> bool {
    true
}

impl RetrievalConfig {
    /// Runtime settings for a [`crate::harvest::Harvester`]
    pub fn to_settings(&self) -> HarvestSettings {
        HarvestSettings {
            page_size: self.page_size,
            keep_alive: self.keep_alive.clone(),
            page_delay: Duration::from_millis(self.page_delay_ms),
            rate_limit: RateLimitPolicy {
                backoff: Duration::from_secs(self.rate_limit_backoff_secs),
                max_retries: match self.max_rate_limit_retries {
                    0 => None,
                    n => Some(n),
                },
            },
            record_ceiling: self.record_ceiling,
            include_raw_json: self.include_raw_json,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Plain,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Token from the config, else from `LENS_API_TOKEN`
    pub fn api_token(&self) -> Option<String> {
        self.api
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Reject settings that cannot drive a run
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.retrieval.page_size == 0 {
            return Err(config::ConfigError::Message(
                "retrieval.page_size must be at least 1".to_string(),
            ));
        }
        if self.retrieval.keep_alive.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "retrieval.keep_alive must not be empty".to_string(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "api.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Render as TOML, without the token
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Write a TOML file, creating parent directories
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = self
            .to_toml()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }
}

/// Load configuration from a file (if any) plus environment overrides
pub fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let config: Config = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    config.validate()?;
    Ok(config)
}

/// Candidate config file locations, in lookup order
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("patent-harvest").join("config.toml"));
    }
    paths
}

/// First existing config file
pub fn find_config_file() -> Option<PathBuf> {
    config_search_paths().into_iter().find(|p| p.is_file())
}
