//! Document model stored in the span and service indices.
//!
//! Field names follow the Jaeger Elasticsearch schema so existing index
//! templates and query services can read the documents unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Span document written to the `jaeger-span-*` indices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbSpan {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub flags: u32,
    #[serde(rename = "operationName")]
    pub operation_name: String,
    pub references: Vec<Reference>,
    /// Microseconds since Unix epoch
    #[serde(rename = "startTime")]
    pub start_time: u64,
    #[serde(rename = "startTimeMillis")]
    pub start_time_millis: u64,
    /// Microseconds
    pub duration: u64,
    pub tags: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tag: Map<String, Value>,
    pub logs: Vec<Log>,
    pub process: Process,
}

fn is_zero(flags: &u32) -> bool {
    *flags == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceType {
    #[serde(rename = "CHILD_OF")]
    ChildOf,
    #[serde(rename = "FOLLOWS_FROM")]
    FollowsFrom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "refType")]
    pub ref_type: ReferenceType,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Bool,
    Int64,
    Float64,
    Binary,
}

/// Tag stored in the nested `tags` list. The value is always the string
/// rendering; the typed value only survives in the `tag` object map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub value: String,
}

impl KeyValue {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value_type: ValueType::String,
            value: value.into(),
        }
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self {
            key: key.into(),
            value_type: ValueType::Bool,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    /// Microseconds since Unix epoch
    pub timestamp: u64,
    pub fields: Vec<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Process {
    #[serde(rename = "serviceName")]
    pub service_name: String,
    pub tags: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tag: Map<String, Value>,
}

/// Service catalog document written to the `jaeger-service-*` indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "serviceName")]
    pub service_name: String,
    #[serde(rename = "operationName")]
    pub operation_name: String,
}
