//! Bulk payload assembly
//!
//! Builds one NDJSON payload for a batch of records together with a ledger
//! that describes each payload entry in order. `ledger[i]` always describes
//! the i-th entry of the payload, and therefore the i-th item of the
//! backend's response.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans};
use otlp2search_core::{ConvertedSpan, IndexNameProvider, Service};

use crate::cache::{ServiceCache, ServiceKey};
use crate::client::BulkClient;
use crate::error::WriteError;

const SPAN_TYPE_NAME: &str = "span";
const SERVICE_TYPE_NAME: &str = "service";

/// A record the writer can submit through the bulk API
pub trait BulkRecord: Send + Sync {
    fn span_id(&self) -> &str;
    fn service_name(&self) -> &str;
    fn operation_name(&self) -> &str;
    /// Chooses the dated index for both the span and its catalog entry
    fn start_time(&self) -> DateTime<Utc>;
    fn span_document(&self) -> Result<Vec<u8>, serde_json::Error>;

    fn service_document(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&Service {
            service_name: self.service_name().to_string(),
            operation_name: self.operation_name().to_string(),
        })
    }

    /// The record as a standalone trace for resubmission
    fn resource_spans(&self) -> ResourceSpans;
}

impl BulkRecord for ConvertedSpan {
    fn span_id(&self) -> &str {
        &self.db_span.span_id
    }

    fn service_name(&self) -> &str {
        ConvertedSpan::service_name(self)
    }

    fn operation_name(&self) -> &str {
        ConvertedSpan::operation_name(self)
    }

    fn start_time(&self) -> DateTime<Utc> {
        ConvertedSpan::start_time(self)
    }

    fn span_document(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.db_span)
    }

    fn resource_spans(&self) -> ResourceSpans {
        ResourceSpans {
            resource: Some(self.resource.as_ref().clone()),
            scope_spans: vec![ScopeSpans {
                scope: Some(self.scope.as_ref().clone()),
                spans: vec![self.span.clone()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Span,
    /// Catalog write; the key is recorded in the cache once confirmed
    Service(ServiceKey),
}

/// Ledger entry: which record a payload entry came from and what it writes
#[derive(Debug)]
pub struct BulkOperation<'a, R> {
    pub record: &'a R,
    pub kind: OperationKind,
}

impl<R> Clone for BulkOperation<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for BulkOperation<'_, R> {}

impl<R> BulkOperation<'_, R> {
    pub fn is_service(&self) -> bool {
        matches!(self.kind, OperationKind::Service(_))
    }
}

#[derive(Debug)]
pub struct AssembledBatch<'a, R> {
    pub payload: Vec<u8>,
    pub ledger: Vec<BulkOperation<'a, R>>,
    /// Records that never made it into the payload
    pub dropped: usize,
    pub errors: Vec<WriteError>,
}

pub struct Assembler<'a, C: ?Sized> {
    pub client: &'a C,
    pub span_index: &'a IndexNameProvider,
    pub service_index: &'a IndexNameProvider,
    pub service_cache: &'a dyn ServiceCache,
    /// Archive writes never touch the service catalog
    pub archive: bool,
}

impl<C: BulkClient + ?Sized> Assembler<'_, C> {
    pub fn assemble<'r, R: BulkRecord>(&self, records: &'r [R]) -> AssembledBatch<'r, R> {
        let mut batch = AssembledBatch {
            payload: Vec::new(),
            ledger: Vec::with_capacity(records.len() * 2),
            dropped: 0,
            errors: Vec::new(),
        };
        // keys already queued by this batch
        let mut queued: HashSet<ServiceKey> = HashSet::new();

        for record in records {
            let document = match record.span_document() {
                Ok(document) => document,
                Err(source) => {
                    tracing::warn!(span_id = record.span_id(), error = %source, "dropping span that failed to serialize");
                    batch.errors.push(WriteError::SpanSerialization {
                        span_id: record.span_id().to_string(),
                        source,
                    });
                    batch.dropped += 1;
                    continue;
                }
            };

            let start_time = record.start_time();
            self.client.append_to_bulk_buffer(
                &mut batch.payload,
                &document,
                &self.span_index.index_name(start_time),
                SPAN_TYPE_NAME,
            );
            batch.ledger.push(BulkOperation {
                record,
                kind: OperationKind::Span,
            });

            if self.archive {
                continue;
            }

            let key = ServiceKey::new(record.service_name(), record.operation_name());
            if queued.contains(&key) || self.service_cache.contains(&key) {
                continue;
            }

            match record.service_document() {
                Ok(document) => {
                    self.client.append_to_bulk_buffer(
                        &mut batch.payload,
                        &document,
                        &self.service_index.index_name(start_time),
                        SERVICE_TYPE_NAME,
                    );
                    batch.ledger.push(BulkOperation {
                        record,
                        kind: OperationKind::Service(key),
                    });
                    queued.insert(key);
                }
                Err(source) => {
                    // the span itself is already queued, so nothing is dropped
                    tracing::warn!(
                        service = record.service_name(),
                        operation = record.operation_name(),
                        error = %source,
                        "failed to serialize service entry"
                    );
                    batch.errors.push(WriteError::ServiceSerialization {
                        service: record.service_name().to_string(),
                        operation: record.operation_name().to_string(),
                        source,
                    });
                }
            }
        }

        tracing::debug!(
            records = records.len(),
            operations = batch.ledger.len(),
            dropped = batch.dropped,
            bytes = batch.payload.len(),
            "assembled bulk payload"
        );
        batch
    }
}
