//! Span batch writer
//!
//! Orchestrates one write call: convert → assemble → submit → reconcile.
//! Every call is self-contained; the service dedup cache is the only state
//! shared between calls.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use otlp2search_core::{
    span_count, template_name, IndexNameError, IndexNameProvider, Translator,
    SERVICE_INDEX_BASE_NAME, SPAN_INDEX_BASE_NAME,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::assembler::{AssembledBatch, Assembler, BulkRecord};
use crate::cache::{MokaServiceCache, ServiceCache, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::client::{BulkClient, BulkResponse};
use crate::error::{ClientError, ExportError, MultiError, WriteError};
use crate::reconcile::{Reconciler, DEFAULT_MAX_SUCCESS_STATUS};

/// Index and bulk settings for a [`SpanWriter`]
#[derive(Debug, Clone)]
pub struct SpanWriterOptions {
    pub index_prefix: String,
    pub date_layout: String,
    pub use_aliases: bool,
    pub archive: bool,
    pub max_success_status: u16,
    pub exporter_name: String,
    pub service_cache_max_entries: u64,
    pub service_cache_ttl: Duration,
}

impl Default for SpanWriterOptions {
    fn default() -> Self {
        Self {
            index_prefix: String::new(),
            date_layout: "%Y-%m-%d".to_string(),
            use_aliases: false,
            archive: false,
            max_success_status: DEFAULT_MAX_SUCCESS_STATUS,
            exporter_name: "elasticsearch".to_string(),
            service_cache_max_entries: DEFAULT_MAX_ENTRIES,
            service_cache_ttl: DEFAULT_TTL,
        }
    }
}

/// Result of one write call
#[derive(Debug)]
pub struct WriteOutcome {
    /// Records not stored by this call
    pub dropped: usize,
    pub error: Option<ExportError>,
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        self.dropped == 0 && self.error.is_none()
    }

    fn failed(dropped: usize, errors: Vec<WriteError>) -> Self {
        Self {
            dropped,
            error: Some(ExportError::Failed(MultiError::new(errors))),
        }
    }
}

pub struct SpanWriter<C> {
    client: C,
    translator: Translator,
    service_cache: Arc<dyn ServiceCache>,
    span_index: IndexNameProvider,
    service_index: IndexNameProvider,
    options: SpanWriterOptions,
}

impl<C> fmt::Debug for SpanWriter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanWriter")
            .field("translator", &self.translator)
            .field("span_index", &self.span_index)
            .field("service_index", &self.service_index)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<C: BulkClient> SpanWriter<C> {
    /// Fails when the configured date layout is not a valid chrono format
    pub fn new(
        client: C,
        translator: Translator,
        options: SpanWriterOptions,
    ) -> Result<Self, IndexNameError> {
        let service_cache = Arc::new(MokaServiceCache::new(
            options.service_cache_max_entries,
            options.service_cache_ttl,
        ));
        let span_index = IndexNameProvider::new(
            SPAN_INDEX_BASE_NAME,
            &options.index_prefix,
            &options.date_layout,
            options.use_aliases,
            options.archive,
        )?;
        let service_index = IndexNameProvider::new(
            SERVICE_INDEX_BASE_NAME,
            &options.index_prefix,
            &options.date_layout,
            options.use_aliases,
            options.archive,
        )?;

        Ok(Self {
            client,
            translator,
            service_cache,
            span_index,
            service_index,
            options,
        })
    }

    /// Replace the dedup cache, e.g. to share one between writers
    pub fn with_service_cache(mut self, service_cache: Arc<dyn ServiceCache>) -> Self {
        self.service_cache = service_cache;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn service_cache(&self) -> &Arc<dyn ServiceCache> {
        &self.service_cache
    }

    pub fn major_version(&self) -> u8 {
        self.client.major_version()
    }

    /// Store the span template, then the service template. Stops at the first
    /// failure.
    pub async fn create_templates(
        &self,
        span_template: &str,
        service_template: &str,
    ) -> Result<(), ClientError> {
        let prefix = &self.options.index_prefix;
        self.client
            .put_template(&template_name(prefix, SPAN_INDEX_BASE_NAME), span_template)
            .await?;
        self.client
            .put_template(&template_name(prefix, SERVICE_INDEX_BASE_NAME), service_template)
            .await?;
        Ok(())
    }

    /// Convert and write an OTLP trace request. A request that cannot be
    /// converted is rejected as a whole with a permanent error.
    pub async fn write_traces(
        &self,
        cancel: &CancellationToken,
        traces: &ExportTraceServiceRequest,
    ) -> WriteOutcome {
        let spans = match self.translator.convert(traces) {
            Ok(spans) => spans,
            Err(err) => {
                let dropped = span_count(traces);
                warn!(error = %err, dropped, "rejecting trace request that cannot be converted");
                return WriteOutcome {
                    dropped,
                    error: Some(ExportError::Permanent(err)),
                };
            }
        };

        self.write_spans(cancel, &spans).await
    }

    /// Write already converted records in one bulk request.
    pub async fn write_spans<R: BulkRecord>(
        &self,
        cancel: &CancellationToken,
        records: &[R],
    ) -> WriteOutcome {
        let assembler = Assembler {
            client: &self.client,
            span_index: &self.span_index,
            service_index: &self.service_index,
            service_cache: self.service_cache.as_ref(),
            archive: self.options.archive,
        };
        let AssembledBatch {
            payload,
            ledger,
            dropped,
            mut errors,
        } = assembler.assemble(records);

        let response = match self.submit(cancel, payload).await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    exporter = %self.options.exporter_name,
                    dropped = records.len(),
                    error = %err,
                    "bulk request failed"
                );
                errors.push(err);
                return WriteOutcome::failed(records.len(), errors);
            }
        };

        let reconciler = Reconciler {
            service_cache: self.service_cache.as_ref(),
            max_success_status: self.options.max_success_status,
            exporter: &self.options.exporter_name,
        };
        let reconciliation = match reconciler.reconcile(&response.items, &ledger) {
            Ok(reconciliation) => reconciliation,
            Err(err) => {
                // positions can no longer be trusted, so nothing counts as stored
                counter!("otlp2search.bulk.failures", 1, "exporter" => self.options.exporter_name.clone());
                warn!(
                    exporter = %self.options.exporter_name,
                    dropped = records.len(),
                    error = %err,
                    "bulk response does not match request"
                );
                errors.push(err);
                return WriteOutcome::failed(records.len(), errors);
            }
        };

        let dropped = dropped + reconciliation.failed_spans;
        errors.extend(reconciliation.errors);

        if !reconciliation.failed.is_empty() {
            let traces = ExportTraceServiceRequest {
                resource_spans: reconciliation
                    .failed
                    .iter()
                    .map(|record| record.resource_spans())
                    .collect(),
            };
            return WriteOutcome {
                dropped,
                error: Some(ExportError::Partial {
                    traces,
                    failed_spans: reconciliation.failed.len(),
                    errors: MultiError::new(errors),
                }),
            };
        }

        debug!(
            exporter = %self.options.exporter_name,
            accepted = reconciliation.accepted_spans,
            dropped,
            "bulk write complete"
        );
        WriteOutcome {
            dropped,
            error: MultiError::wrap(errors).map(ExportError::Failed),
        }
    }

    async fn submit(
        &self,
        cancel: &CancellationToken,
        payload: Vec<u8>,
    ) -> Result<BulkResponse, WriteError> {
        counter!("otlp2search.bulk.requests", 1, "exporter" => self.options.exporter_name.clone());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WriteError::Cancelled),
            response = self.client.bulk(payload) => response.map_err(WriteError::Transport),
        };

        if result.is_err() {
            counter!("otlp2search.bulk.failures", 1, "exporter" => self.options.exporter_name.clone());
        }
        result
    }
}
