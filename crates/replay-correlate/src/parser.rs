//! Trace file parsing
//!
//! A trace file is a stream of YAML documents. The first one carries log
//! metadata; every following `{event: {...}}` document is one lifecycle
//! event of the process engine.

use crate::ingest::IngestError;
use chrono::{DateTime, FixedOffset};
use replay_core::events::{Lifecycle, TraceEvent};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

const INSTANCE_FIELD: &str = "cpee:instance";
const ACTIVITY_FIELD: &str = "cpee:activity_uuid";
const ENDPOINT_FIELD: &str = "concept:endpoint";
const TIMESTAMP_FIELD: &str = "time:timestamp";
const TRANSITION_FIELD: &str = "cpee:lifecycle:transition";

/// Timestamp layouts accepted besides RFC 3339
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Counters of one parse run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Event documents seen (metadata header excluded)
    pub documents: usize,

    /// Documents turned into events
    pub events: usize,

    /// Documents that were skipped
    pub skipped: usize,

    /// The scan stopped early on a YAML syntax error
    pub truncated: bool,
}

/// Events read from one trace file
#[derive(Debug, Clone, Default)]
pub struct ParsedTrace {
    pub events: Vec<TraceEvent>,
    pub stats: ParseStats,
}

/// Why a document did not produce an event
#[derive(Debug)]
enum Skip {
    NotAnEvent,
    UnknownTransition(String),

    /// Process-level events carry no instance or activity
    MissingKey(&'static str),
    Malformed(&'static str),
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::NotAnEvent => f.write_str("not an event document"),
            Skip::UnknownTransition(t) => write!(f, "untracked transition {:?}", t),
            Skip::MissingKey(key) => write!(f, "missing {}", key),
            Skip::Malformed(reason) => f.write_str(reason),
        }
    }
}

/// Parse trace events from a YAML document stream
pub fn parse_trace_str(input: &str) -> ParsedTrace {
    let mut trace = ParsedTrace::default();

    for (index, document) in serde_yaml::Deserializer::from_str(input).enumerate() {
        let value = match YamlValue::deserialize(document) {
            Ok(value) => value,
            Err(e) => {
                warn!("YAML error in document {}, stopping scan: {}", index, e);
                trace.stats.truncated = true;
                break;
            }
        };

        // metadata header
        if index == 0 {
            continue;
        }

        trace.stats.documents += 1;
        match event_from_document(&value) {
            Ok(event) => trace.events.push(event),
            Err(
                skip @ (Skip::UnknownTransition(_) | Skip::NotAnEvent | Skip::MissingKey(_)),
            ) => {
                debug!("Skipping document {}: {}", index, skip);
                trace.stats.skipped += 1;
            }
            Err(skip) => {
                warn!("Skipping document {}: {}", index, skip);
                trace.stats.skipped += 1;
            }
        }
    }

    trace.stats.events = trace.events.len();
    trace
}

/// Read and parse one trace file
pub fn read_trace_file(path: &Path) -> Result<ParsedTrace, IngestError> {
    let content = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let trace = parse_trace_str(&content);
    debug!(
        "Parsed {}: {} events, {} skipped",
        path.display(),
        trace.stats.events,
        trace.stats.skipped
    );
    Ok(trace)
}

fn event_from_document(doc: &YamlValue) -> Result<TraceEvent, Skip> {
    let event = doc
        .get("event")
        .filter(|e| e.is_mapping())
        .ok_or(Skip::NotAnEvent)?;

    let transition = event
        .get(TRANSITION_FIELD)
        .and_then(YamlValue::as_str)
        .ok_or(Skip::Malformed("missing lifecycle transition"))?;
    let lifecycle = Lifecycle::from_transition(transition)
        .ok_or_else(|| Skip::UnknownTransition(transition.to_string()))?;

    let instance_id = identifier(event.get(INSTANCE_FIELD))
        .ok_or(Skip::MissingKey(INSTANCE_FIELD))?;
    let activity_id = identifier(event.get(ACTIVITY_FIELD))
        .ok_or(Skip::MissingKey(ACTIVITY_FIELD))?;
    let timestamp = event
        .get(TIMESTAMP_FIELD)
        .and_then(YamlValue::as_str)
        .and_then(parse_timestamp)
        .ok_or(Skip::Malformed("missing or invalid timestamp"))?;

    Ok(TraceEvent {
        instance_id,
        activity_id,
        endpoint: identifier(event.get(ENDPOINT_FIELD)),
        timestamp,
        lifecycle,
        data: payload(event)?,
    })
}

/// Render a scalar identifier as a string
fn identifier(value: Option<&YamlValue>) -> Option<String> {
    match value? {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse an event timestamp (RFC 3339 or ISO with a space separator)
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts);
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(s, format).ok())
}

/// Payload items from `data`, falling back to `raw`
fn payload(event: &YamlValue) -> Result<Vec<JsonValue>, Skip> {
    let source = ["data", "raw"]
        .iter()
        .filter_map(|key| event.get(*key))
        .find(|value| is_present(value));

    let Some(source) = source else {
        return Ok(Vec::new());
    };

    let json = serde_json::to_value(source)
        .map_err(|_| Skip::Malformed("payload is not representable as JSON"))?;

    Ok(match json {
        JsonValue::Array(items) => items,
        JsonValue::Null => Vec::new(),
        other => vec![other],
    })
}

fn is_present(value: &YamlValue) -> bool {
    match value {
        YamlValue::Null => false,
        YamlValue::String(s) => !s.is_empty(),
        YamlValue::Sequence(items) => !items.is_empty(),
        YamlValue::Mapping(map) => !map.is_empty(),
        _ => true,
    }
}
