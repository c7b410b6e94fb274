// Synthetic OTLP trace data generators for benchmarking
//
// Creates ExportTraceServiceRequest instances with configurable span counts,
// spread over a fixed set of services and operations so the service catalog
// sees realistic key repetition.

use async_trait::async_trait;
use otlp2search::otlp2search_core::opentelemetry_proto::tonic::{
    collector::trace::v1::ExportTraceServiceRequest,
    common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue},
    resource::v1::Resource,
    trace::v1::{span::SpanKind, ResourceSpans, ScopeSpans, Span},
};
use otlp2search::otlp2search_writer::{BulkClient, BulkResponse, ClientError};

/// 2024-01-15T14:30:00Z
const BASE_TIME_NANOS: u64 = 1_705_329_000_000_000_000;
const OPERATIONS: [&str; 5] = ["GET /cart", "POST /charge", "SELECT orders", "publish", "render"];

/// Workload size presets
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum WorkloadSize {
    Small,  // 1k spans
    Medium, // 10k spans
    Large,  // 100k spans
}

impl WorkloadSize {
    pub fn span_count(&self) -> usize {
        match self {
            WorkloadSize::Small => 1_000,
            WorkloadSize::Medium => 10_000,
            WorkloadSize::Large => 100_000,
        }
    }
}

/// Generate a synthetic OTLP ExportTraceServiceRequest
pub fn generate_otlp_traces(size: WorkloadSize) -> ExportTraceServiceRequest {
    let span_count = size.span_count();

    // Each resource represents a different service instance
    let num_resources = (span_count / 100).clamp(1, 100);
    let spans_per_resource = span_count / num_resources;

    let resource_spans = (0..num_resources)
        .map(|resource_idx| {
            let spans = (0..spans_per_resource)
                .map(|i| {
                    let id = (resource_idx * spans_per_resource + i + 1) as u64;
                    generate_span(id, OPERATIONS[i % OPERATIONS.len()])
                })
                .collect();

            ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![
                        key_value("service.name", &format!("bench-service-{}", resource_idx % 10)),
                        key_value("service.instance.id", &format!("instance-{}", resource_idx)),
                        key_value("host.name", &format!("host-{}", resource_idx % 20)),
                        key_value("deployment.environment", "benchmark"),
                    ],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: "otlp2search-bench".to_string(),
                        version: "1.0.0".to_string(),
                        ..Default::default()
                    }),
                    spans,
                    ..Default::default()
                }],
                ..Default::default()
            }
        })
        .collect();

    ExportTraceServiceRequest { resource_spans }
}

fn generate_span(id: u64, operation: &str) -> Span {
    let mut trace_id = (id / 8 + 1).to_be_bytes().to_vec();
    trace_id.extend_from_slice(&id.to_be_bytes());
    let start = BASE_TIME_NANOS + id * 1_000_000;

    Span {
        trace_id,
        span_id: id.to_be_bytes().to_vec(),
        parent_span_id: if id % 8 == 0 {
            Vec::new()
        } else {
            (id - 1).to_be_bytes().to_vec()
        },
        name: operation.to_string(),
        kind: SpanKind::Server as i32,
        start_time_unix_nano: start,
        end_time_unix_nano: start + 250_000,
        attributes: vec![
            key_value("http.method", "GET"),
            key_value("http.route", operation),
            key_value("peer.service", "inventory"),
        ],
        ..Default::default()
    }
}

fn key_value(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

/// Bulk client that only builds payloads; never called over the network
pub struct PayloadOnlyClient;

#[async_trait]
impl BulkClient for PayloadOnlyClient {
    async fn bulk(&self, _payload: Vec<u8>) -> Result<BulkResponse, ClientError> {
        Ok(BulkResponse::default())
    }

    async fn put_template(&self, _name: &str, _template: &str) -> Result<(), ClientError> {
        Ok(())
    }

    fn major_version(&self) -> u8 {
        7
    }
}
