//! Call correlation
//!
//! Pairs a `calling` event with the `receiving`, `instantiation` and `done`
//! events of the same (instance, activity). One correlator covers one trace
//! file; state never crosses files.

use chrono::{DateTime, FixedOffset};
use replay_core::events::{
    CallKey, InteractionKind, Lifecycle, ParamMap, RecordedInteraction, ResponseEntry, TraceEvent,
};
use std::collections::HashMap;
use tracing::debug;

/// A call that has been issued but not finished yet
#[derive(Debug, Clone)]
struct PendingCall {
    endpoint: String,
    issued_at: DateTime<FixedOffset>,
    input_params: ParamMap,
    responses: Vec<ResponseEntry>,
    instantiated: bool,
}

impl PendingCall {
    fn into_interaction(self, key: CallKey) -> RecordedInteraction {
        RecordedInteraction {
            instance_id: key.instance_id,
            activity_id: key.activity_id,
            endpoint_id: self.endpoint,
            issued_at: self.issued_at,
            input_params: self.input_params,
            responses: self.responses,
            kind: if self.instantiated {
                InteractionKind::Instantiation
            } else {
                InteractionKind::Call
            },
        }
    }
}

/// Counters of one correlation scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationStats {
    pub events: usize,
    pub interactions: usize,

    /// `receiving` events without a preceding `calling`
    pub orphan_receivings: usize,

    /// `done` events without an open call
    pub orphan_dones: usize,

    /// Calls still open at end of file
    pub dropped: usize,
}

/// Stateful accumulator turning trace events into recorded interactions
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<CallKey, PendingCall>,
    stats: CorrelationStats,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event; returns the interaction it finalized, if any
    pub fn add_event(&mut self, event: TraceEvent) -> Option<RecordedInteraction> {
        self.stats.events += 1;

        match event.lifecycle {
            Lifecycle::Calling => {
                self.handle_calling(event);
                None
            }
            Lifecycle::Receiving => {
                self.handle_receiving(event);
                None
            }
            Lifecycle::Instantiated => {
                if let Some(call) = self.pending.get_mut(&event.key()) {
                    call.instantiated = true;
                }
                None
            }
            Lifecycle::Done => self.handle_done(event),
        }
    }

    fn handle_calling(&mut self, event: TraceEvent) {
        let input_params = event.params();
        let endpoint = event.endpoint.clone().unwrap_or_default();

        match self.pending.get_mut(&event.key()) {
            // Re-issued call: the latest call wins, collected responses stay.
            // An earlier instantiation belongs to the superseded call.
            Some(call) => {
                call.input_params = input_params;
                call.endpoint = endpoint;
                call.issued_at = event.timestamp;
                call.instantiated = false;
            }
            None => {
                self.pending.insert(
                    event.key(),
                    PendingCall {
                        endpoint,
                        issued_at: event.timestamp,
                        input_params,
                        responses: Vec::new(),
                        instantiated: false,
                    },
                );
            }
        }
    }

    fn handle_receiving(&mut self, event: TraceEvent) {
        let key = event.key();
        if !self.pending.contains_key(&key) {
            debug!(
                "Receiving without calling for instance={} activity={}",
                key.instance_id, key.activity_id
            );
            self.stats.orphan_receivings += 1;
        }

        let call = self.pending.entry(key).or_insert_with(|| PendingCall {
            endpoint: event.endpoint.clone().unwrap_or_default(),
            issued_at: event.timestamp,
            input_params: ParamMap::new(),
            responses: Vec::new(),
            instantiated: false,
        });

        call.responses.push(ResponseEntry {
            timestamp: event.timestamp,
            lifecycle: event.lifecycle,
            data: event.data,
        });
    }

    fn handle_done(&mut self, event: TraceEvent) -> Option<RecordedInteraction> {
        let key = event.key();
        match self.pending.remove(&key) {
            Some(call) => {
                self.stats.interactions += 1;
                Some(call.into_interaction(key))
            }
            None => {
                self.stats.orphan_dones += 1;
                None
            }
        }
    }

    /// Number of calls currently open
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Close the scope; calls never finished are dropped
    pub fn finish(mut self) -> CorrelationStats {
        self.stats.dropped = self.pending.len();
        if self.stats.dropped > 0 {
            debug!("Dropping {} unfinished call(s)", self.stats.dropped);
        }
        self.stats
    }
}

/// Correlate a complete event sequence
pub fn correlate(events: impl IntoIterator<Item = TraceEvent>) -> Vec<RecordedInteraction> {
    let mut correlator = Correlator::new();
    let interactions = events
        .into_iter()
        .filter_map(|event| correlator.add_event(event))
        .collect();
    correlator.finish();
    interactions
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn event(
        activity: &str,
        lifecycle: Lifecycle,
        second: u32,
        endpoint: Option<&str>,
        data: Vec<Value>,
    ) -> TraceEvent {
        TraceEvent {
            instance_id: "7".to_string(),
            activity_id: activity.to_string(),
            endpoint: endpoint.map(str::to_string),
            timestamp: DateTime::parse_from_rfc3339(&format!("2024-01-01T12:00:{:02}Z", second))
                .unwrap(),
            lifecycle,
            data,
        }
    }

    fn calling(activity: &str, second: u32, data: Vec<Value>) -> TraceEvent {
        event(activity, Lifecycle::Calling, second, Some("http://svc/op"), data)
    }

    fn receiving(activity: &str, second: u32, data: Vec<Value>) -> TraceEvent {
        event(activity, Lifecycle::Receiving, second, None, data)
    }

    fn done(activity: &str, second: u32) -> TraceEvent {
        event(activity, Lifecycle::Done, second, None, vec![])
    }

    #[test]
    fn test_call_with_responses() {
        let interactions = correlate(vec![
            calling("a", 0, vec![json!({"name": "x", "value": 1})]),
            receiving("a", 2, vec![json!({"name": "r", "data": "one"})]),
            receiving("a", 5, vec![json!({"name": "r", "data": "two"})]),
            done("a", 6),
        ]);

        assert_eq!(interactions.len(), 1);
        let interaction = &interactions[0];
        assert_eq!(interaction.kind, InteractionKind::Call);
        assert_eq!(interaction.endpoint_id, "http://svc/op");
        assert_eq!(interaction.input_params["x"], json!(1));
        assert_eq!(interaction.responses.len(), 2);
        assert_eq!(interaction.responses[1].data[0]["data"], json!("two"));
        assert_eq!(interaction.issued_at.timestamp() % 60, 0);
    }

    #[test]
    fn test_instantiation_flag() {
        let interactions = correlate(vec![
            calling("a", 0, vec![json!({"name": "url", "value": "http://model"})]),
            event("a", Lifecycle::Instantiated, 1, None, vec![]),
            done("a", 2),
        ]);

        assert_eq!(interactions.len(), 1);
        assert!(interactions[0].is_instantiation());
        assert!(interactions[0].responses.is_empty());
    }

    #[test]
    fn test_instantiation_without_call_is_ignored() {
        let mut correlator = Correlator::new();
        assert!(correlator
            .add_event(event("a", Lifecycle::Instantiated, 0, None, vec![]))
            .is_none());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_fire_and_forget_call() {
        let interactions = correlate(vec![calling("a", 0, vec![]), done("a", 1)]);
        assert_eq!(interactions.len(), 1);
        assert!(interactions[0].responses.is_empty());
        assert_eq!(interactions[0].kind, InteractionKind::Call);
    }

    #[test]
    fn test_orphan_receiving_creates_placeholder() {
        let mut correlator = Correlator::new();
        correlator.add_event(event(
            "a",
            Lifecycle::Receiving,
            3,
            Some("http://svc/late"),
            vec![json!({"name": "r"})],
        ));
        let interaction = correlator.add_event(done("a", 4)).unwrap();

        assert_eq!(interaction.endpoint_id, "http://svc/late");
        assert!(interaction.input_params.is_empty());
        assert_eq!(interaction.issued_at.timestamp() % 60, 3);
        assert_eq!(interaction.responses.len(), 1);

        let stats = correlator.finish();
        assert_eq!(stats.orphan_receivings, 1);
        assert_eq!(stats.interactions, 1);
    }

    #[test]
    fn test_orphan_done_is_skipped() {
        let mut correlator = Correlator::new();
        assert!(correlator.add_event(done("a", 0)).is_none());
        assert_eq!(correlator.finish().orphan_dones, 1);
    }

    #[test]
    fn test_unfinished_calls_are_dropped() {
        let mut correlator = Correlator::new();
        correlator.add_event(calling("a", 0, vec![]));
        correlator.add_event(calling("b", 0, vec![]));
        correlator.add_event(done("b", 1));

        let stats = correlator.finish();
        assert_eq!(stats.events, 3);
        assert_eq!(stats.interactions, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_reentrant_calling_keeps_responses() {
        let interactions = correlate(vec![
            calling("a", 0, vec![json!({"name": "try", "value": 1})]),
            receiving("a", 1, vec![json!({"name": "r", "data": "first"})]),
            event("a", Lifecycle::Instantiated, 1, None, vec![]),
            event(
                "a",
                Lifecycle::Calling,
                2,
                Some("http://svc/retry"),
                vec![json!({"name": "try", "value": 2})],
            ),
            receiving("a", 3, vec![json!({"name": "r", "data": "second"})]),
            done("a", 4),
        ]);

        assert_eq!(interactions.len(), 1);
        let interaction = &interactions[0];
        assert_eq!(interaction.input_params["try"], json!(2));
        assert_eq!(interaction.endpoint_id, "http://svc/retry");
        assert_eq!(interaction.issued_at.timestamp() % 60, 2);
        assert_eq!(interaction.responses.len(), 2);
        assert_eq!(interaction.responses[0].data[0]["data"], json!("first"));
        assert_eq!(interaction.kind, InteractionKind::Call);
    }

    #[test]
    fn test_interleaved_activities() {
        let interactions = correlate(vec![
            calling("a", 0, vec![]),
            calling("b", 1, vec![]),
            receiving("b", 2, vec![]),
            receiving("a", 3, vec![]),
            done("b", 4),
            done("a", 5),
        ]);

        let ids: Vec<_> = interactions.iter().map(|i| i.activity_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(interactions.iter().all(|i| i.responses.len() == 1));
    }
}
