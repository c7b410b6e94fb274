//! Error types for the bulk span writer

use std::fmt;

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use otlp2search_core::ConvertError;
use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E001: A document could not be serialized
    E001Serialization,
    /// E002: The bulk request never produced a response
    E002Transport,
    /// E003: The backend rejected a single bulk item
    E003ItemRejected,
    /// E004: Bulk response does not line up with the request
    E004ResponseMismatch,
    /// E005: The caller cancelled the write
    E005Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E001Serialization => "E001",
            Self::E002Transport => "E002",
            Self::E003ItemRejected => "E003",
            Self::E004ResponseMismatch => "E004",
            Self::E005Cancelled => "E005",
        }
    }
}

/// Errors raised by a [`crate::BulkClient`]
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search backend responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode bulk response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no search servers configured")]
    NoServers,
}

/// A single failure observed while writing one batch
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("[E001] failed to serialize span {span_id}: {source}")]
    SpanSerialization {
        span_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("[E001] failed to serialize service {service}/{operation}: {source}")]
    ServiceSerialization {
        service: String,
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("[E002] bulk request failed: {0}")]
    Transport(#[from] ClientError),

    #[error("[E005] bulk request cancelled before a response arrived")]
    Cancelled,

    #[error("[E003] bulk request failed, reason {reason}, result: {result} (status {status})")]
    ItemFailed {
        status: u16,
        result: String,
        reason: String,
        error_type: String,
        cause_type: String,
        cause_reason: String,
    },

    #[error("[E004] bulk response has {actual} items but {expected} operations were sent")]
    ResponseMismatch { expected: usize, actual: usize },
}

impl WriteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SpanSerialization { .. } | Self::ServiceSerialization { .. } => {
                ErrorCode::E001Serialization
            }
            Self::Transport(_) => ErrorCode::E002Transport,
            Self::Cancelled => ErrorCode::E005Cancelled,
            Self::ItemFailed { .. } => ErrorCode::E003ItemRejected,
            Self::ResponseMismatch { .. } => ErrorCode::E004ResponseMismatch,
        }
    }
}

/// Ordered collection of the failures seen during one write
#[derive(Debug, Default)]
pub struct MultiError(Vec<WriteError>);

impl MultiError {
    pub fn new(errors: Vec<WriteError>) -> Self {
        Self(errors)
    }

    /// `None` when there is nothing to report
    pub fn wrap(errors: Vec<WriteError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self(errors))
        }
    }

    pub fn errors(&self) -> &[WriteError] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WriteError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<WriteError> {
        self.0
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

impl FromIterator<WriteError> for MultiError {
    fn from_iter<I: IntoIterator<Item = WriteError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a MultiError {
    type Item = &'a WriteError;
    type IntoIter = std::slice::Iter<'a, WriteError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Outcome error of a whole write call, as seen by the caller
#[derive(Debug, Error)]
pub enum ExportError {
    /// The request can never be written; retrying is pointless
    #[error("permanent error: {0}")]
    Permanent(#[source] ConvertError),

    /// Some spans were refused; `traces` holds exactly those spans for retry
    #[error("failed to write {failed_spans} spans: {errors}")]
    Partial {
        traces: ExportTraceServiceRequest,
        failed_spans: usize,
        errors: MultiError,
    },

    #[error("{0}")]
    Failed(MultiError),
}

impl ExportError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Spans to resubmit, present only for partial failures
    pub fn failed_traces(&self) -> Option<&ExportTraceServiceRequest> {
        match self {
            Self::Partial { traces, .. } => Some(traces),
            _ => None,
        }
    }

    pub fn errors(&self) -> Option<&MultiError> {
        match self {
            Self::Partial { errors, .. } | Self::Failed(errors) => Some(errors),
            Self::Permanent(_) => None,
        }
    }
}
