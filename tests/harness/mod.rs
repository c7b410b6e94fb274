//! Shared harness for writer integration tests
//!
//! Provides:
//! - `ScriptedBackend`: an in-memory `BulkClient` answering each bulk call with
//!   a scripted list of per-item statuses (or a transport failure) and keeping
//!   every payload it receives
//! - builders for OTLP trace requests with predictable span IDs
//! - helpers to read bulk payloads back as (action, document) pairs

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use otlp2search::otlp2search_core::opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use otlp2search::otlp2search_core::opentelemetry_proto::tonic::common::v1::{
    any_value, AnyValue, InstrumentationScope, KeyValue,
};
use otlp2search::otlp2search_core::opentelemetry_proto::tonic::resource::v1::Resource;
use otlp2search::otlp2search_core::opentelemetry_proto::tonic::trace::v1::{
    ResourceSpans, ScopeSpans, Span,
};
use otlp2search::otlp2search_writer::{
    BulkClient, BulkItemError, BulkItemResponse, BulkResponse, ClientError,
};
use serde_json::Value;

/// 2024-01-15T14:30:00Z
pub const START_TIME_NANOS: u64 = 1_705_329_000_000_000_000;

/// One scripted answer to a bulk call
pub enum Reply {
    Items(Vec<BulkItemResponse>),
    Unavailable(u16),
}

/// Stored item, as the backend reports a freshly indexed document
pub fn created() -> BulkItemResponse {
    BulkItemResponse {
        result: "created".to_string(),
        ..BulkItemResponse::with_status(201)
    }
}

/// Refused item with a backend error body
pub fn rejected(status: u16, error_type: &str, reason: &str) -> BulkItemResponse {
    BulkItemResponse {
        error: Some(BulkItemError {
            error_type: error_type.to_string(),
            reason: reason.to_string(),
            caused_by: None,
        }),
        ..BulkItemResponse::with_status(status)
    }
}

#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    payloads: Mutex<Vec<String>>,
    templates: Mutex<Vec<(String, String)>>,
    latency: Option<Duration>,
    version: Option<u8>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    /// Every item of the next bulk call is stored
    pub fn accept_all(self, items: usize) -> Self {
        self.reply(Reply::Items((0..items).map(|_| created()).collect()))
    }

    /// Delay every bulk answer
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = Some(version);
        self
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn templates(&self) -> Vec<(String, String)> {
        self.templates.lock().unwrap().clone()
    }
}

#[async_trait]
impl BulkClient for ScriptedBackend {
    async fn bulk(&self, payload: Vec<u8>) -> Result<BulkResponse, ClientError> {
        self.payloads
            .lock()
            .unwrap()
            .push(String::from_utf8(payload).expect("bulk payload is utf-8"));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Items(items)) => Ok(BulkResponse::new(items)),
            Some(Reply::Unavailable(status)) => Err(ClientError::Status {
                status,
                body: "cluster unavailable".to_string(),
            }),
            None => Ok(BulkResponse::default()),
        }
    }

    async fn put_template(&self, name: &str, template: &str) -> Result<(), ClientError> {
        self.templates
            .lock()
            .unwrap()
            .push((name.to_string(), template.to_string()));
        Ok(())
    }

    fn major_version(&self) -> u8 {
        self.version.unwrap_or(7)
    }
}

/// Span with a trace ID and span ID derived from `id` (which must be non-zero)
pub fn span(id: u64, operation: &str) -> Span {
    let mut trace_id = vec![0u8; 8];
    trace_id.extend_from_slice(&id.to_be_bytes());
    Span {
        trace_id,
        span_id: id.to_be_bytes().to_vec(),
        name: operation.to_string(),
        start_time_unix_nano: START_TIME_NANOS + id * 1_000,
        end_time_unix_nano: START_TIME_NANOS + id * 1_000 + 500_000,
        ..Default::default()
    }
}

/// Hex span ID as it appears in stored documents
pub fn span_id_hex(id: u64) -> String {
    format!("{:016x}", id)
}

pub fn string_attr(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

pub fn resource_spans(service: &str, spans: Vec<Span>) -> ResourceSpans {
    ResourceSpans {
        resource: Some(Resource {
            attributes: vec![string_attr("service.name", service)],
            ..Default::default()
        }),
        scope_spans: vec![ScopeSpans {
            scope: Some(InstrumentationScope {
                name: "otlp2search-tests".to_string(),
                version: "1.0.0".to_string(),
                ..Default::default()
            }),
            spans,
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Request with one resource per service, spans in the given order
pub fn trace_request(services: Vec<(&str, Vec<Span>)>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: services
            .into_iter()
            .map(|(service, spans)| resource_spans(service, spans))
            .collect(),
    }
}

/// Split an NDJSON bulk payload into (action, document) pairs
pub fn bulk_entries(payload: &str) -> Vec<(Value, Value)> {
    let lines: Vec<&str> = payload.lines().collect();
    assert_eq!(lines.len() % 2, 0, "bulk payload has an odd number of lines");
    lines
        .chunks(2)
        .map(|pair| {
            (
                serde_json::from_str(pair[0]).expect("action line is json"),
                serde_json::from_str(pair[1]).expect("document line is json"),
            )
        })
        .collect()
}

/// Index names targeted by a payload, in order
pub fn target_indices(payload: &str) -> Vec<String> {
    bulk_entries(payload)
        .iter()
        .map(|(action, _)| action["index"]["_index"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Span IDs contained in a request, in order
pub fn span_ids(request: &ExportTraceServiceRequest) -> Vec<Vec<u8>> {
    request
        .resource_spans
        .iter()
        .flat_map(|rs| rs.scope_spans.iter())
        .flat_map(|ss| ss.spans.iter())
        .map(|span| span.span_id.clone())
        .collect()
}
