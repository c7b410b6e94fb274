//! Bulk span writer with partial-failure reconciliation
//!
//! Writes converted spans, plus a deduplicated service catalog, to a search
//! backend through its bulk API. Per-item outcomes are matched back to the
//! records that produced them so only refused spans are handed back for retry.

// Partial failures carry the refused spans themselves, which makes the error
// type large; it is only built on the failure path.
#![allow(clippy::result_large_err)]

mod assembler;
mod cache;
mod client;
mod elasticsearch;
mod error;
mod http;
mod reconcile;
mod writer;

pub use assembler::{AssembledBatch, Assembler, BulkOperation, BulkRecord, OperationKind};
pub use cache::{MokaServiceCache, ServiceCache, ServiceKey, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
pub use client::{BulkClient, BulkItemError, BulkItemResponse, BulkResponse, ErrorCause};
pub use elasticsearch::{ElasticsearchClient, ElasticsearchClientConfig};
pub use error::{ClientError, ErrorCode, ExportError, MultiError, WriteError};
pub use http::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use reconcile::{Reconciler, Reconciliation, DEFAULT_MAX_SUCCESS_STATUS};
pub use writer::{SpanWriter, SpanWriterOptions, WriteOutcome};

// Re-export commonly used types for convenience
pub use otlp2search_core;
pub use tokio_util::sync::CancellationToken;
