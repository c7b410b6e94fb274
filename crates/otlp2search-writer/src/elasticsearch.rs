//! Elasticsearch / OpenSearch bulk client

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tracing::{debug, instrument};

use crate::client::{BulkClient, BulkResponse};
use crate::error::ClientError;
use crate::http::{HttpClient, ReqwestHttpClient};

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Connection settings for [`ElasticsearchClient`]
#[derive(Debug, Clone)]
pub struct ElasticsearchClientConfig {
    pub servers: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Backend major version
    pub version: u8,
    pub timeout: Duration,
}

impl Default for ElasticsearchClientConfig {
    fn default() -> Self {
        Self {
            servers: vec!["http://127.0.0.1:9200".to_string()],
            username: None,
            password: None,
            version: 7,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Bulk client that spreads requests round-robin over the configured servers
pub struct ElasticsearchClient<H = ReqwestHttpClient> {
    http: H,
    servers: Vec<String>,
    authorization: Option<String>,
    version: u8,
    next_server: AtomicUsize,
}

impl ElasticsearchClient<ReqwestHttpClient> {
    pub fn new(config: ElasticsearchClientConfig) -> Result<Self, ClientError> {
        let http = ReqwestHttpClient::new(config.timeout)?;
        Self::with_http_client(config, http)
    }
}

impl<H: HttpClient> ElasticsearchClient<H> {
    pub fn with_http_client(config: ElasticsearchClientConfig, http: H) -> Result<Self, ClientError> {
        let servers: Vec<String> = config
            .servers
            .iter()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if servers.is_empty() {
            return Err(ClientError::NoServers);
        }

        let authorization = config.username.as_ref().map(|username| {
            let password = config.password.as_deref().unwrap_or_default();
            let credentials = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", username, password));
            format!("Basic {}", credentials)
        });

        Ok(Self {
            http,
            servers,
            authorization,
            version: config.version,
            next_server: AtomicUsize::new(0),
        })
    }

    fn server(&self) -> &str {
        let i = self.next_server.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        &self.servers[i]
    }

    fn headers(&self, content_type: &str) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), content_type.to_string())];
        if let Some(auth) = &self.authorization {
            headers.push(("Authorization".to_string(), auth.clone()));
        }
        headers
    }
}

#[async_trait]
impl<H: HttpClient> BulkClient for ElasticsearchClient<H> {
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn bulk(&self, payload: Vec<u8>) -> Result<BulkResponse, ClientError> {
        let url = format!("{}/_bulk", self.server());
        let response = self
            .http
            .post(&url, self.headers(NDJSON_CONTENT_TYPE), payload)
            .await?
            .error_for_status()?;

        let parsed: BulkResponse = response.json()?;
        debug!(
            url = %url,
            items = parsed.items.len(),
            errors = parsed.errors,
            took_ms = parsed.took,
            "bulk response received"
        );
        Ok(parsed)
    }

    #[instrument(skip(self, template), fields(name = %name))]
    async fn put_template(&self, name: &str, template: &str) -> Result<(), ClientError> {
        let url = format!("{}/_template/{}", self.server(), name);
        self.http
            .put(&url, self.headers(JSON_CONTENT_TYPE), template.as_bytes().to_vec())
            .await?
            .error_for_status()?;

        debug!(url = %url, "index template stored");
        Ok(())
    }

    fn major_version(&self) -> u8 {
        self.version
    }
}
