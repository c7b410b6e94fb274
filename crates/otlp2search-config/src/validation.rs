// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use chrono::format::{Item, StrftimeItems};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_elasticsearch_config(&config.elasticsearch)?;
    validate_index_config(&config.index)?;
    validate_tags_config(&config.tags)?;
    validate_service_cache_config(&config.service_cache)?;
    validate_bulk_config(&config.bulk)?;

    Ok(())
}

fn validate_elasticsearch_config(config: &ElasticsearchConfig) -> Result<()> {
    if config.servers.is_empty() {
        bail!("elasticsearch.servers must list at least one server");
    }

    for server in &config.servers {
        if !server.starts_with("http://") && !server.starts_with("https://") {
            bail!(
                "elasticsearch.servers entry '{}' must start with http:// or https://",
                server
            );
        }
    }

    if config.version == 0 {
        bail!("elasticsearch.version must be a backend major version (e.g. 6, 7, 8)");
    }

    if config.timeout_secs == 0 {
        bail!("elasticsearch.timeout_secs must be greater than 0");
    }

    if config.username.is_some() != config.password.is_some() {
        warn!("elasticsearch.username and elasticsearch.password should be set together");
    }

    Ok(())
}

fn validate_index_config(config: &IndexConfig) -> Result<()> {
    if config.date_layout.trim().is_empty() && !config.use_aliases && !config.archive {
        bail!("index.date_layout must not be empty when daily indices are used");
    }

    if StrftimeItems::new(&config.date_layout).any(|item| matches!(item, Item::Error)) {
        bail!(
            "index.date_layout '{}' is not a valid chrono format string",
            config.date_layout
        );
    }

    if config.prefix.ends_with('-') {
        warn!(
            prefix = %config.prefix,
            "index.prefix ends with '-'; the separator is added automatically"
        );
    }

    Ok(())
}

fn validate_tags_config(config: &TagsConfig) -> Result<()> {
    if config.dot_replacement.is_empty() {
        bail!("tags.dot_replacement must not be empty");
    }

    if config.dot_replacement.contains('.') {
        bail!("tags.dot_replacement must not contain '.'");
    }

    Ok(())
}

fn validate_service_cache_config(config: &ServiceCacheConfig) -> Result<()> {
    if config.max_entries == 0 {
        bail!("service_cache.max_entries must be greater than 0");
    }

    if config.ttl_secs == 0 {
        bail!("service_cache.ttl_secs must be greater than 0");
    }

    if config.max_entries > 10_000_000 {
        warn!(
            max_entries = config.max_entries,
            "service_cache.max_entries is very large; may cause memory issues"
        );
    }

    Ok(())
}

fn validate_bulk_config(config: &BulkConfig) -> Result<()> {
    if !(200..=299).contains(&config.max_success_status) {
        bail!(
            "bulk.max_success_status must be a 2xx status, got {}",
            config.max_success_status
        );
    }

    if config.exporter_name.trim().is_empty() {
        bail!("bulk.exporter_name must not be empty");
    }

    Ok(())
}
