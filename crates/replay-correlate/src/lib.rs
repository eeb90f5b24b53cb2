//! Trace parsing and call correlation
//!
//! Turns CPEE trace files (multi-document YAML) into recorded interactions
//! and loads them into an interaction store.

pub mod correlator;
pub mod ingest;
pub mod parser;

pub use correlator::{correlate, CorrelationStats, Correlator};
pub use ingest::{ingest_directory, IngestError, IngestMode, IngestOptions, IngestReport};
pub use parser::{parse_trace_str, read_trace_file, ParseStats, ParsedTrace};
