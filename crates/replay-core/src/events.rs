//! Trace events and recorded interactions
//!
//! A trace file is a sequence of lifecycle events emitted by the process
//! engine. The correlator folds them into [`RecordedInteraction`]s, the unit
//! that is stored, matched and replayed.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Parameter map of a recorded call (name -> JSON value, insertion ordered)
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

/// Lifecycle transition of an activity call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// The engine issued the call
    #[serde(rename = "activity/calling")]
    Calling,

    /// A response (possibly one of several) arrived
    #[serde(rename = "activity/receiving")]
    Receiving,

    /// The call spawned a sub-process instance
    #[serde(rename = "task/instantiation")]
    Instantiated,

    /// The call finished
    #[serde(rename = "activity/done")]
    Done,
}

impl Lifecycle {
    /// Map a trace transition string to a lifecycle kind
    pub fn from_transition(transition: &str) -> Option<Self> {
        match transition {
            "activity/calling" => Some(Lifecycle::Calling),
            "activity/receiving" => Some(Lifecycle::Receiving),
            "task/instantiation" => Some(Lifecycle::Instantiated),
            "activity/done" => Some(Lifecycle::Done),
            _ => None,
        }
    }

    /// Transition string as written in trace files
    pub fn as_transition(&self) -> &'static str {
        match self {
            Lifecycle::Calling => "activity/calling",
            Lifecycle::Receiving => "activity/receiving",
            Lifecycle::Instantiated => "task/instantiation",
            Lifecycle::Done => "activity/done",
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_transition())
    }
}

/// One lifecycle event read from a trace file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Process instance identifier
    pub instance_id: String,

    /// Activity identifier within the instance
    pub activity_id: String,

    /// Endpoint identifier (always present on `calling`)
    pub endpoint: Option<String>,

    /// Event timestamp
    pub timestamp: DateTime<FixedOffset>,

    /// Lifecycle kind
    pub lifecycle: Lifecycle,

    /// Payload items, each usually `{name, value, ...}`
    pub data: Vec<serde_json::Value>,
}

impl TraceEvent {
    /// Correlation key of this event
    pub fn key(&self) -> CallKey {
        CallKey {
            instance_id: self.instance_id.clone(),
            activity_id: self.activity_id.clone(),
        }
    }

    /// Collect `name -> value` pairs from the payload, last write wins
    pub fn params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        for item in &self.data {
            if let Some(obj) = item.as_object() {
                if let Some(name) = obj.get("name").and_then(|n| n.as_str()) {
                    let value = obj.get("value").cloned().unwrap_or(serde_json::Value::Null);
                    params.insert(name.to_string(), value);
                }
            }
        }
        params
    }
}

/// Identity of a call within one trace file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    pub instance_id: String,
    pub activity_id: String,
}

/// A response observed for a recorded call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry {
    /// When the response was observed
    pub timestamp: DateTime<FixedOffset>,

    /// Lifecycle kind of the originating event
    pub lifecycle: Lifecycle,

    /// Payload items as recorded
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// Kind of a recorded interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// Ordinary call with zero or more responses
    Call,
    /// Call that spawned a sub-process instance
    Instantiation,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Call => "call",
            InteractionKind::Instantiation => "instantiation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(InteractionKind::Call),
            "instantiation" => Some(InteractionKind::Instantiation),
            _ => None,
        }
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized call together with its responses
///
/// `(instance_id, activity_id, endpoint_id, input_params)` is unique within
/// a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedInteraction {
    pub instance_id: String,
    pub activity_id: String,
    pub endpoint_id: String,

    /// Timestamp of the originating `calling` event
    pub issued_at: DateTime<FixedOffset>,

    /// Call parameters
    pub input_params: ParamMap,

    /// Responses in observed order
    pub responses: Vec<ResponseEntry>,

    pub kind: InteractionKind,
}

impl RecordedInteraction {
    /// Canonical serialization of the input parameters
    ///
    /// Compact JSON in insertion order; part of the uniqueness key.
    pub fn params_json(&self) -> String {
        serde_json::Value::Object(self.input_params.clone()).to_string()
    }

    /// Serialized response list as stored
    pub fn responses_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.responses)
    }

    pub fn is_instantiation(&self) -> bool {
        self.kind == InteractionKind::Instantiation
    }
}
