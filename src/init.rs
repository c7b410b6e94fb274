// Initialization utilities
//
// Span writer and logging/tracing setup

use anyhow::{Context, Result};
use otlp2search_config::{LogConfig, LogFormat, RuntimeConfig};
use otlp2search_core::Translator;
use otlp2search_writer::{ElasticsearchClient, ElasticsearchClientConfig, SpanWriter, SpanWriterOptions};
use tracing::info;

/// Map the index, bulk and cache sections onto writer options
pub fn writer_options(config: &RuntimeConfig) -> SpanWriterOptions {
    SpanWriterOptions {
        index_prefix: config.index.prefix.clone(),
        date_layout: config.index.date_layout.clone(),
        use_aliases: config.index.use_aliases,
        archive: config.index.archive,
        max_success_status: config.bulk.max_success_status,
        exporter_name: config.bulk.exporter_name.clone(),
        service_cache_max_entries: config.service_cache.max_entries,
        service_cache_ttl: config.service_cache.ttl(),
    }
}

/// Build the Elasticsearch-backed span writer from RuntimeConfig
pub fn init_writer(config: &RuntimeConfig) -> Result<SpanWriter<ElasticsearchClient>> {
    let es = &config.elasticsearch;
    info!(
        "Initializing span writer: servers={}, version={}",
        es.servers.join(","),
        es.version
    );

    let client = ElasticsearchClient::new(ElasticsearchClientConfig {
        servers: es.servers.clone(),
        username: es.username.clone(),
        password: es.password.clone(),
        version: es.version,
        timeout: es.timeout(),
    })
    .context("Failed to create Elasticsearch client")?;

    let tag_keys = config
        .tags
        .tag_keys_as_fields()
        .context("Failed to load tag keys stored as fields")?;
    if config.tags.all_as_fields {
        info!("Storing all tags as object fields");
    } else if !tag_keys.is_empty() {
        info!("Storing {} tag keys as object fields", tag_keys.len());
    }
    let translator = Translator::new(
        config.tags.all_as_fields,
        tag_keys,
        config.tags.dot_replacement.clone(),
    );

    if config.index.archive {
        info!("Archive mode: service catalog is not written");
    }

    SpanWriter::new(client, translator, writer_options(config))
        .context("Invalid index configuration")
}

/// Initialize tracing/logging from the log section
pub fn init_tracing(log: &LogConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Parse log level from config
    let env_filter = EnvFilter::try_new(&log.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match log.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
        }
        LogFormat::Text => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_writer_options_follow_config() {
        let mut config = RuntimeConfig::default();
        config.index.prefix = "prod".to_string();
        config.index.archive = true;
        config.bulk.max_success_status = 299;
        config.bulk.exporter_name = "es-primary".to_string();
        config.service_cache.ttl_secs = 60;

        let options = writer_options(&config);
        assert_eq!(options.index_prefix, "prod");
        assert!(options.archive);
        assert_eq!(options.max_success_status, 299);
        assert_eq!(options.exporter_name, "es-primary");
        assert_eq!(options.service_cache_ttl, Duration::from_secs(60));
        assert_eq!(options.service_cache_max_entries, 100_000);
    }

    #[test]
    fn test_init_writer_with_defaults() {
        let writer = init_writer(&RuntimeConfig::default()).unwrap();
        assert_eq!(writer.major_version(), 7);
    }

    #[test]
    fn test_init_writer_without_servers() {
        let mut config = RuntimeConfig::default();
        config.elasticsearch.servers.clear();

        let err = init_writer(&config).unwrap_err();
        assert!(err.to_string().contains("Elasticsearch client"));
    }

    #[test]
    fn test_init_writer_rejects_bad_date_layout() {
        let mut config = RuntimeConfig::default();
        config.index.date_layout = "%Y-%m-%Q".to_string();

        let err = init_writer(&config).unwrap_err();
        assert!(err.to_string().contains("Invalid index configuration"));
    }

    #[test]
    fn test_init_writer_missing_tag_keys_file() {
        let mut config = RuntimeConfig::default();
        config.tags.keys_as_fields_file = Some("/nonexistent/keys.txt".to_string());

        assert!(init_writer(&config).is_err());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        let log = LogConfig {
            level: "not a valid filter[".to_string(),
            format: LogFormat::Json,
        };
        init_tracing(&log);
        init_tracing(&LogConfig::default());
    }
}
