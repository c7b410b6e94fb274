use super::{LogFormat, RuntimeConfig};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "OTLP2SEARCH_";

/// Abstraction over environment-variable lookups so tests and embedding
/// hosts can supply their own source of overrides.
pub trait EnvSource {
    /// Look up `key` with the `OTLP2SEARCH_` prefix applied
    fn get(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Backend connection
    if let Some(servers) = get_env_list(env, "ES_SERVERS") {
        config.elasticsearch.servers = servers;
    }
    if let Some(username) = env.get("ES_USERNAME") {
        config.elasticsearch.username = Some(username);
    }
    if let Some(password) = env.get("ES_PASSWORD") {
        config.elasticsearch.password = Some(password);
    }
    if let Some(version) = get_env_parsed::<_, u8>(env, "ES_VERSION")? {
        config.elasticsearch.version = version;
    }
    if let Some(timeout) = get_env_parsed::<_, u64>(env, "ES_TIMEOUT_SECS")? {
        config.elasticsearch.timeout_secs = timeout;
    }

    // Index naming
    if let Some(prefix) = env.get("INDEX_PREFIX") {
        config.index.prefix = prefix;
    }
    if let Some(layout) = env.get("INDEX_DATE_LAYOUT") {
        config.index.date_layout = layout;
    }
    if let Some(val) = get_env_bool(env, "INDEX_USE_ALIASES")? {
        config.index.use_aliases = val;
    }
    if let Some(val) = get_env_bool(env, "INDEX_ARCHIVE")? {
        config.index.archive = val;
    }

    // Tags
    if let Some(val) = get_env_bool(env, "TAGS_ALL_AS_FIELDS")? {
        config.tags.all_as_fields = val;
    }
    if let Some(keys) = get_env_list(env, "TAGS_AS_FIELDS") {
        config.tags.keys_as_fields = keys;
    }
    if let Some(path) = env.get("TAGS_AS_FIELDS_FILE") {
        config.tags.keys_as_fields_file = Some(path);
    }
    if let Some(replacement) = env.get("TAGS_DOT_REPLACEMENT") {
        config.tags.dot_replacement = replacement;
    }

    // Service cache
    if let Some(val) = get_env_parsed::<_, u64>(env, "SERVICE_CACHE_MAX_ENTRIES")? {
        config.service_cache.max_entries = val;
    }
    if let Some(val) = get_env_parsed::<_, u64>(env, "SERVICE_CACHE_TTL_SECS")? {
        config.service_cache.ttl_secs = val;
    }

    // Bulk handling
    if let Some(val) = get_env_parsed::<_, u16>(env, "BULK_MAX_SUCCESS_STATUS")? {
        config.bulk.max_success_status = val;
    }
    if let Some(name) = env.get("EXPORTER_NAME") {
        config.bulk.exporter_name = name;
    }

    // Logging
    if let Some(level) = env.get("LOG_LEVEL") {
        config.log.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.log.format = format
            .parse::<LogFormat>()
            .context("Invalid OTLP2SEARCH_LOG_FORMAT value")?;
    }

    Ok(())
}

/// Comma-separated list; empty segments are dropped
fn get_env_list<E: EnvSource>(env: &E, key: &str) -> Option<Vec<String>> {
    env.get(key).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn get_env_parsed<E, T>(env: &E, key: &str) -> Result<Option<T>>
where
    E: EnvSource,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_bool<E: EnvSource>(env: &E, key: &str) -> Result<Option<bool>> {
    match env.get(key) {
        Some(val) => {
            let parsed = val.trim().parse::<bool>().map_err(|e| {
                anyhow!(
                    "Failed to parse {}{} (expected bool): {}",
                    ENV_PREFIX,
                    key,
                    e
                )
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
