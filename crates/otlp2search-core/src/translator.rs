//! OTLP trace request → span documents.
//!
//! Each converted span keeps the OTLP span, resource and scope it came from so
//! a writer can rebuild a minimal trace for the spans the backend refused.

use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, status::StatusCode, Span};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::dbmodel::{DbSpan, KeyValue, Log, Process, Reference, ReferenceType, ValueType};

/// Service name used when a resource carries no `service.name` attribute
pub const NO_SERVICE_NAME: &str = "OTLPResourceNoServiceName";

const SERVICE_NAME_KEY: &str = "service.name";
const SPAN_KIND_KEY: &str = "span.kind";
const STATUS_CODE_KEY: &str = "otel.status_code";
const STATUS_DESCRIPTION_KEY: &str = "otel.status_description";
const ERROR_KEY: &str = "error";
const LIBRARY_NAME_KEY: &str = "otel.library.name";
const LIBRARY_VERSION_KEY: &str = "otel.library.version";
const EVENT_KEY: &str = "event";

/// Conversion failures. Any of these rejects the whole request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("invalid trace ID '{id}': must be 16 bytes and not all zero")]
    InvalidTraceId { id: String },

    #[error("invalid span ID '{id}': must be 8 bytes and not all zero")]
    InvalidSpanId { id: String },
}

/// A span translated into its stored document, together with the OTLP data
/// needed to resubmit it.
#[derive(Debug, Clone)]
pub struct ConvertedSpan {
    pub db_span: DbSpan,
    pub span: Span,
    pub resource: Arc<Resource>,
    pub scope: Arc<InstrumentationScope>,
}

impl ConvertedSpan {
    pub fn service_name(&self) -> &str {
        &self.db_span.process.service_name
    }

    pub fn operation_name(&self) -> &str {
        &self.db_span.operation_name
    }

    /// Span start time, used to pick the dated index
    pub fn start_time(&self) -> DateTime<Utc> {
        i64::try_from(self.db_span.start_time)
            .ok()
            .and_then(DateTime::from_timestamp_micros)
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Number of spans in a request, regardless of validity
pub fn span_count(request: &ExportTraceServiceRequest) -> usize {
    request
        .resource_spans
        .iter()
        .flat_map(|rs| rs.scope_spans.iter())
        .map(|ss| ss.spans.len())
        .sum()
}

/// Converts OTLP spans into Jaeger-compatible span documents
#[derive(Debug, Clone)]
pub struct Translator {
    all_tags_as_fields: bool,
    tag_keys_as_fields: HashSet<String>,
    dot_replacement: String,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(false, HashSet::new(), "@")
    }
}

impl Translator {
    pub fn new(
        all_tags_as_fields: bool,
        tag_keys_as_fields: HashSet<String>,
        dot_replacement: impl Into<String>,
    ) -> Self {
        Self {
            all_tags_as_fields,
            tag_keys_as_fields,
            dot_replacement: dot_replacement.into(),
        }
    }

    /// Convert every span in the request, in request order.
    pub fn convert(
        &self,
        request: &ExportTraceServiceRequest,
    ) -> Result<Vec<ConvertedSpan>, ConvertError> {
        let mut converted = Vec::with_capacity(span_count(request));

        for resource_spans in &request.resource_spans {
            let resource = Arc::new(resource_spans.resource.clone().unwrap_or_default());
            let process = self.process(&resource);

            for scope_spans in &resource_spans.scope_spans {
                let scope = Arc::new(scope_spans.scope.clone().unwrap_or_default());

                for span in &scope_spans.spans {
                    let db_span = self.db_span(span, &scope, process.clone())?;
                    converted.push(ConvertedSpan {
                        db_span,
                        span: span.clone(),
                        resource: Arc::clone(&resource),
                        scope: Arc::clone(&scope),
                    });
                }
            }
        }

        tracing::debug!(spans = converted.len(), "converted trace request");
        Ok(converted)
    }

    fn process(&self, resource: &Resource) -> Process {
        let mut service_name = None;
        let mut tags = Vec::new();
        let mut tag = Map::new();

        for attr in &resource.attributes {
            if attr.key == SERVICE_NAME_KEY {
                if let Some(any_value::Value::StringValue(name)) =
                    attr.value.as_ref().and_then(|v| v.value.as_ref())
                {
                    if !name.is_empty() {
                        service_name = Some(name.clone());
                        continue;
                    }
                }
            }
            self.push_tag(&attr.key, attr.value.as_ref(), &mut tags, &mut tag);
        }

        Process {
            service_name: service_name.unwrap_or_else(|| NO_SERVICE_NAME.to_string()),
            tags,
            tag,
        }
    }

    fn db_span(
        &self,
        span: &Span,
        scope: &InstrumentationScope,
        process: Process,
    ) -> Result<DbSpan, ConvertError> {
        let trace_id = trace_id_hex(&span.trace_id)?;
        let span_id = span_id_hex(&span.span_id)?;

        let mut references = Vec::with_capacity(span.links.len() + 1);
        if let Some(parent_id) = parent_span_id_hex(&span.parent_span_id)? {
            references.push(Reference {
                ref_type: ReferenceType::ChildOf,
                trace_id: trace_id.clone(),
                span_id: parent_id,
            });
        }
        for link in &span.links {
            references.push(Reference {
                ref_type: ReferenceType::FollowsFrom,
                trace_id: trace_id_hex(&link.trace_id)?,
                span_id: span_id_hex(&link.span_id)?,
            });
        }

        let mut tags = Vec::with_capacity(span.attributes.len() + 4);
        let mut tag = Map::new();
        for attr in &span.attributes {
            self.push_tag(&attr.key, attr.value.as_ref(), &mut tags, &mut tag);
        }
        for (key, value) in synthesized_tags(span, scope) {
            self.push_tag(key, Some(&value), &mut tags, &mut tag);
        }

        let logs = span
            .events
            .iter()
            .map(|event| {
                let mut fields = Vec::with_capacity(event.attributes.len() + 1);
                if !event.name.is_empty() {
                    fields.push(KeyValue::string(EVENT_KEY, event.name.clone()));
                }
                fields.extend(
                    event
                        .attributes
                        .iter()
                        .map(|attr| tag_key_value(&attr.key, attr.value.as_ref())),
                );
                Log {
                    timestamp: event.time_unix_nano / 1_000,
                    fields,
                }
            })
            .collect();

        Ok(DbSpan {
            trace_id,
            span_id,
            flags: span.flags & 0xff,
            operation_name: span.name.clone(),
            references,
            start_time: span.start_time_unix_nano / 1_000,
            start_time_millis: span.start_time_unix_nano / 1_000_000,
            duration: span
                .end_time_unix_nano
                .saturating_sub(span.start_time_unix_nano)
                / 1_000,
            tags,
            tag,
            logs,
            process,
        })
    }

    fn is_field(&self, key: &str) -> bool {
        self.all_tags_as_fields || self.tag_keys_as_fields.contains(key)
    }

    fn push_tag(
        &self,
        key: &str,
        value: Option<&AnyValue>,
        tags: &mut Vec<KeyValue>,
        fields: &mut Map<String, Value>,
    ) {
        if self.is_field(key) {
            fields.insert(
                key.replace('.', &self.dot_replacement),
                field_value(value),
            );
        } else {
            tags.push(tag_key_value(key, value));
        }
    }
}

/// Tags derived from span kind, status and instrumentation scope
fn synthesized_tags(span: &Span, scope: &InstrumentationScope) -> Vec<(&'static str, AnyValue)> {
    let mut tags = Vec::new();

    let kind = match span.kind() {
        SpanKind::Unspecified => None,
        SpanKind::Internal => Some("internal"),
        SpanKind::Server => Some("server"),
        SpanKind::Client => Some("client"),
        SpanKind::Producer => Some("producer"),
        SpanKind::Consumer => Some("consumer"),
    };
    if let Some(kind) = kind {
        tags.push((SPAN_KIND_KEY, string_value(kind)));
    }

    if let Some(status) = &span.status {
        match status.code() {
            StatusCode::Unset => {}
            StatusCode::Ok => tags.push((STATUS_CODE_KEY, string_value("OK"))),
            StatusCode::Error => {
                tags.push((STATUS_CODE_KEY, string_value("ERROR")));
                tags.push((
                    ERROR_KEY,
                    AnyValue {
                        value: Some(any_value::Value::BoolValue(true)),
                    },
                ));
            }
        }
        if !status.message.is_empty() {
            tags.push((STATUS_DESCRIPTION_KEY, string_value(&status.message)));
        }
    }

    if !scope.name.is_empty() {
        tags.push((LIBRARY_NAME_KEY, string_value(&scope.name)));
    }
    if !scope.version.is_empty() {
        tags.push((LIBRARY_VERSION_KEY, string_value(&scope.version)));
    }

    tags
}

fn string_value(value: &str) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::StringValue(value.to_string())),
    }
}

fn tag_key_value(key: &str, value: Option<&AnyValue>) -> KeyValue {
    let (value_type, value) = match value.and_then(|v| v.value.as_ref()) {
        None => (ValueType::String, String::new()),
        Some(any_value::Value::StringValue(s)) => (ValueType::String, s.clone()),
        Some(any_value::Value::BoolValue(b)) => (ValueType::Bool, b.to_string()),
        Some(any_value::Value::IntValue(i)) => (ValueType::Int64, i.to_string()),
        Some(any_value::Value::DoubleValue(d)) => (ValueType::Float64, d.to_string()),
        Some(any_value::Value::BytesValue(b)) => (ValueType::Binary, hex::encode(b)),
        Some(other) => (ValueType::String, nested_json(other).to_string()),
    };
    KeyValue {
        key: key.to_string(),
        value_type,
        value,
    }
}

/// Typed value stored in the `tag` object map
fn field_value(value: Option<&AnyValue>) -> Value {
    match value.and_then(|v| v.value.as_ref()) {
        None => Value::String(String::new()),
        Some(any_value::Value::StringValue(s)) => Value::String(s.clone()),
        Some(any_value::Value::BoolValue(b)) => Value::Bool(*b),
        Some(any_value::Value::IntValue(i)) => Value::from(*i),
        Some(any_value::Value::DoubleValue(d)) => Value::from(*d),
        Some(any_value::Value::BytesValue(b)) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        // nested structures are flattened to their JSON text
        Some(other) => Value::String(nested_json(other).to_string()),
    }
}

fn nested_json(value: &any_value::Value) -> Value {
    match value {
        any_value::Value::StringValue(s) => Value::String(s.clone()),
        any_value::Value::BoolValue(b) => Value::Bool(*b),
        any_value::Value::IntValue(i) => Value::from(*i),
        any_value::Value::DoubleValue(d) => Value::from(*d),
        any_value::Value::BytesValue(b) => Value::String(hex::encode(b)),
        any_value::Value::ArrayValue(array) => Value::Array(
            array
                .values
                .iter()
                .map(|v| v.value.as_ref().map(nested_json).unwrap_or(Value::Null))
                .collect(),
        ),
        any_value::Value::KvlistValue(list) => Value::Object(
            list.values
                .iter()
                .map(|kv| {
                    let v = kv
                        .value
                        .as_ref()
                        .and_then(|v| v.value.as_ref())
                        .map(nested_json)
                        .unwrap_or(Value::Null);
                    (kv.key.clone(), v)
                })
                .collect(),
        ),
    }
}

fn trace_id_hex(bytes: &[u8]) -> Result<String, ConvertError> {
    let invalid = || ConvertError::InvalidTraceId {
        id: hex::encode(bytes),
    };
    let id: [u8; 16] = bytes.try_into().map_err(|_| invalid())?;
    if id == [0u8; 16] {
        return Err(invalid());
    }
    // 64-bit trace IDs keep their short form
    if id[..8] == [0u8; 8] {
        Ok(hex::encode(&id[8..]))
    } else {
        Ok(hex::encode(id))
    }
}

fn span_id_hex(bytes: &[u8]) -> Result<String, ConvertError> {
    let invalid = || ConvertError::InvalidSpanId {
        id: hex::encode(bytes),
    };
    let id: [u8; 8] = bytes.try_into().map_err(|_| invalid())?;
    if id == [0u8; 8] {
        return Err(invalid());
    }
    Ok(hex::encode(id))
}

fn parent_span_id_hex(bytes: &[u8]) -> Result<Option<String>, ConvertError> {
    if bytes.is_empty() || bytes.iter().all(|b| *b == 0) {
        return Ok(None);
    }
    span_id_hex(bytes).map(Some)
}
