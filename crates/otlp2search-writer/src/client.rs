//! Bulk submission gateway abstraction and the backend's bulk response model

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::ClientError;

/// First backend major version that no longer accepts mapping types
const TYPELESS_MAJOR_VERSION: u8 = 7;

/// Access to a search backend's bulk and template APIs
#[async_trait]
pub trait BulkClient: Send + Sync {
    /// Submit an NDJSON bulk payload. Items in the response are ordered like
    /// the entries of the payload.
    async fn bulk(&self, payload: Vec<u8>) -> Result<BulkResponse, ClientError>;

    async fn put_template(&self, name: &str, template: &str) -> Result<(), ClientError>;

    fn major_version(&self) -> u8;

    /// Append one index action line and its document line to `buffer`.
    /// The mapping type is only emitted for backends that still use one.
    fn append_to_bulk_buffer(&self, buffer: &mut Vec<u8>, document: &[u8], index: &str, doc_type: &str) {
        let meta = if self.major_version() < TYPELESS_MAJOR_VERSION {
            json!({ "_index": index, "_type": doc_type })
        } else {
            json!({ "_index": index })
        };
        let action = json!({ "index": meta });

        buffer.extend_from_slice(action.to_string().as_bytes());
        buffer.push(b'\n');
        buffer.extend_from_slice(document);
        buffer.push(b'\n');
    }
}

/// Parsed `_bulk` response
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "RawBulkResponse")]
pub struct BulkResponse {
    pub took: u64,
    pub errors: bool,
    pub items: Vec<BulkItemResponse>,
}

impl BulkResponse {
    pub fn new(items: Vec<BulkItemResponse>) -> Self {
        let errors = items.iter().any(|item| item.error.is_some());
        Self {
            took: 0,
            errors,
            items,
        }
    }
}

/// Outcome of one bulk entry
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BulkItemResponse {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub result: String,
    /// Required: an item without a status cannot be classified
    pub status: u16,
    #[serde(default)]
    pub error: Option<BulkItemError>,
}

impl BulkItemResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BulkItemError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub caused_by: Option<ErrorCause>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorCause {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub reason: String,
}

// Each item is keyed by the action that produced it.
#[derive(Deserialize)]
struct RawBulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<RawBulkItem>,
}

#[derive(Deserialize)]
struct RawBulkItem {
    #[serde(alias = "create")]
    index: BulkItemResponse,
}

impl From<RawBulkResponse> for BulkResponse {
    fn from(raw: RawBulkResponse) -> Self {
        Self {
            took: raw.took,
            errors: raw.errors,
            items: raw.items.into_iter().map(|item| item.index).collect(),
        }
    }
}
