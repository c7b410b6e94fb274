// otlp2search-core - Pure trace conversion logic
//
// Turns OTLP trace requests into the documents stored by the search backend
// and names the indices they land in. No I/O, no async, no runtime dependencies.

pub mod dbmodel;
pub mod index_name;
pub mod translator;

// Re-export commonly used types
pub use dbmodel::{DbSpan, Service};
pub use index_name::{
    template_name, validate_date_layout, IndexNameError, IndexNameProvider, SERVICE_INDEX_BASE_NAME, SPAN_INDEX_BASE_NAME,
};
pub use translator::{span_count, ConvertError, ConvertedSpan, Translator, NO_SERVICE_NAME};

// OTLP message types used across the workspace
pub use opentelemetry_proto;
