// otlp2search-config - Runtime configuration for the bulk span writer
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from OTLP2SEARCH_CONFIG env var
// 3. Config file contents from OTLP2SEARCH_CONFIG_CONTENT env var
// 4. Default config file locations (./config.toml, ./.otlp2search.toml)
// 5. Built-in defaults (lowest priority)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{apply_env_overrides, EnvSource, ENV_PREFIX};
pub use sources::{load_from_file_path, load_from_str};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub tags: TagsConfig,

    #[serde(default)]
    pub service_cache: ServiceCacheConfig,

    #[serde(default)]
    pub bulk: BulkConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Connection settings for the search backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Backend major version; decides whether bulk actions carry `_type`.
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_servers() -> Vec<String> {
    vec!["http://127.0.0.1:9200".to_string()]
}

fn default_version() -> u8 {
    7
}

fn default_timeout_secs() -> u64 {
    30
}

impl ElasticsearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            username: None,
            password: None,
            version: default_version(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Index naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub prefix: String,
    /// chrono format string used for the daily index suffix
    #[serde(default = "default_date_layout")]
    pub date_layout: String,
    #[serde(default)]
    pub use_aliases: bool,
    #[serde(default)]
    pub archive: bool,
}

fn default_date_layout() -> String {
    "%Y-%m-%d".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            date_layout: default_date_layout(),
            use_aliases: false,
            archive: false,
        }
    }
}

/// Which tags are stored as object fields instead of nested key/value lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsConfig {
    #[serde(default)]
    pub all_as_fields: bool,
    #[serde(default)]
    pub keys_as_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys_as_fields_file: Option<String>,
    #[serde(default = "default_dot_replacement")]
    pub dot_replacement: String,
}

fn default_dot_replacement() -> String {
    "@".to_string()
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            all_as_fields: false,
            keys_as_fields: Vec::new(),
            keys_as_fields_file: None,
            dot_replacement: default_dot_replacement(),
        }
    }
}

impl TagsConfig {
    /// Union of `keys_as_fields` and the keys listed in `keys_as_fields_file`
    /// (one per line, blank lines ignored).
    pub fn tag_keys_as_fields(&self) -> Result<HashSet<String>> {
        let mut keys: HashSet<String> = self
            .keys_as_fields
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(path) = &self.keys_as_fields_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read tag keys file: {}", path))?;
            keys.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }

        Ok(keys)
    }
}

/// Service catalog dedup cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceCacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl ServiceCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for ServiceCacheConfig {
    fn default() -> Self {
        Self {
            // distinct (service, operation) pairs are not expected to exceed this
            max_entries: 100_000,
            ttl_secs: 12 * 60 * 60,
        }
    }
}

/// Bulk request handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Highest per-item status still counted as stored
    #[serde(default = "default_max_success_status")]
    pub max_success_status: u16,
    /// Label attached to exporter metrics
    #[serde(default = "default_exporter_name")]
    pub exporter_name: String,
}

fn default_max_success_status() -> u16 {
    201
}

fn default_exporter_name() -> String {
    "elasticsearch".to_string()
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_success_status: default_max_success_status(),
            exporter_name: default_exporter_name(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Unsupported log format: {}. Supported: text, json", s),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
