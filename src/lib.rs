// otlp2search - OpenTelemetry traces to Elasticsearch/OpenSearch
//
// Wires the runtime configuration to the bulk span writer:
// - otlp2search-config: layered config loading (env > file > defaults)
// - otlp2search-core: OTLP → Jaeger document translation and index naming
// - otlp2search-writer: bulk assembly, submission and partial-failure reconciliation

mod init;

pub use init::{init_tracing, init_writer, writer_options};

pub use otlp2search_config;
pub use otlp2search_core;
pub use otlp2search_writer;
