//! Timed replay of recorded responses
//!
//! Walks a recorded interaction's responses and hands each one to a
//! [`ResponseSink`] at the offset it had in the original trace. Runs as a
//! detached tokio task so the request that triggered it can complete
//! immediately.

use crate::events::ResponseEntry;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors raised while delivering a single response
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Callback returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid callback target: {0}")]
    InvalidTarget(String),
}

impl DeliveryError {
    /// Network failures and 5xx answers may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Network(_) => true,
            DeliveryError::Status { status, .. } => *status >= 500,
            DeliveryError::InvalidTarget(_) => false,
        }
    }
}

/// Destination for replayed responses
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Deliver one response to `target`
    ///
    /// `is_final` is false while more responses of the same interaction
    /// are still to come.
    async fn deliver(
        &self,
        target: &str,
        response: &ResponseEntry,
        is_final: bool,
    ) -> Result<(), DeliveryError>;
}

/// Outcome of one replay walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Responses handed to the sink successfully
    pub delivered: usize,

    /// Responses whose delivery failed
    pub failed: usize,

    /// Wall time spent in the walk
    pub elapsed: Duration,
}

/// Schedules response deliveries at their recorded offsets
#[derive(Clone)]
pub struct ReplayScheduler {
    sink: Arc<dyn ResponseSink>,
}

impl ReplayScheduler {
    pub fn new(sink: Arc<dyn ResponseSink>) -> Self {
        Self { sink }
    }

    /// Spawn a detached replay task
    ///
    /// The returned handle may be dropped; the task always runs to
    /// completion and logs its own failures.
    pub fn schedule(
        &self,
        target: String,
        responses: Vec<ResponseEntry>,
        baseline: DateTime<FixedOffset>,
    ) -> JoinHandle<ReplaySummary> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let summary = scheduler.run(&target, &responses, baseline).await;
            info!(
                "Replay to {} finished: {} delivered, {} failed in {:?}",
                target, summary.delivered, summary.failed, summary.elapsed
            );
            summary
        })
    }

    /// Deliver `responses` to `target`, honoring the recorded timing
    pub async fn run(
        &self,
        target: &str,
        responses: &[ResponseEntry],
        baseline: DateTime<FixedOffset>,
    ) -> ReplaySummary {
        walk(Some((self.sink.as_ref(), target)), responses, baseline).await
    }

    /// Reproduce only the timing of `responses`, delivering nothing
    pub async fn delays_only(
        responses: &[ResponseEntry],
        baseline: DateTime<FixedOffset>,
    ) -> ReplaySummary {
        walk(None, responses, baseline).await
    }
}

/// Reference instant for offsets: the call start, or the first response
/// when that was recorded earlier.
pub fn replay_anchor(
    baseline: DateTime<FixedOffset>,
    responses: &[ResponseEntry],
) -> DateTime<FixedOffset> {
    match responses.first() {
        Some(first) => baseline.min(first.timestamp),
        None => baseline,
    }
}

/// Non-negative offset of `timestamp` from `anchor`
pub fn offset_from(anchor: DateTime<FixedOffset>, timestamp: DateTime<FixedOffset>) -> Duration {
    timestamp
        .signed_duration_since(anchor)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

async fn walk(
    sink: Option<(&dyn ResponseSink, &str)>,
    responses: &[ResponseEntry],
    baseline: DateTime<FixedOffset>,
) -> ReplaySummary {
    let started = Instant::now();
    let mut summary = ReplaySummary::default();

    if responses.is_empty() {
        return summary;
    }

    let anchor = replay_anchor(baseline, responses);
    let last = responses.len() - 1;

    for (index, response) in responses.iter().enumerate() {
        let offset = offset_from(anchor, response.timestamp);

        // a deadline already in the past resolves immediately
        tokio::time::sleep_until(started + offset).await;

        let Some((sink, target)) = sink else {
            continue;
        };

        let is_final = index == last;
        match sink.deliver(target, response, is_final).await {
            Ok(()) => {
                summary.delivered += 1;
                debug!(
                    "Delivered response {}/{} to {} (final: {})",
                    index + 1,
                    responses.len(),
                    target,
                    is_final
                );
            }
            Err(e) => {
                summary.failed += 1;
                warn!(
                    "Failed to deliver response {}/{} to {}: {}",
                    index + 1,
                    responses.len(),
                    target,
                    e
                );
            }
        }
    }

    summary.elapsed = started.elapsed();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Lifecycle;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Debug, Clone)]
    struct Delivery {
        target: String,
        marker: String,
        is_final: bool,
        at: Instant,
    }

    /// Records deliveries; fails the ones whose marker is listed
    #[derive(Default)]
    struct RecordingSink {
        deliveries: Mutex<Vec<Delivery>>,
        fail_markers: Vec<String>,
    }

    #[async_trait]
    impl ResponseSink for RecordingSink {
        async fn deliver(
            &self,
            target: &str,
            response: &ResponseEntry,
            is_final: bool,
        ) -> Result<(), DeliveryError> {
            let marker = response.data[0]["value"].as_str().unwrap_or_default().to_string();
            self.deliveries.lock().push(Delivery {
                target: target.to_string(),
                marker: marker.clone(),
                is_final,
                at: Instant::now(),
            });
            if self.fail_markers.contains(&marker) {
                return Err(DeliveryError::Network("connection refused".to_string()));
            }
            Ok(())
        }
    }

    fn base() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-01-01T12:00:00+01:00").unwrap()
    }

    fn response(offset_secs: i64, marker: &str) -> ResponseEntry {
        ResponseEntry {
            timestamp: base() + chrono::Duration::seconds(offset_secs),
            lifecycle: Lifecycle::Receiving,
            data: vec![json!({"name": "marker", "value": marker})],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_in_order_with_final_flag() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = ReplayScheduler::new(sink.clone());
        let responses = vec![response(0, "a"), response(1, "b"), response(3, "c")];

        let summary = scheduler.run("http://cb", &responses, base()).await;

        assert_eq!(summary.delivered, 3);
        assert_eq!(summary.failed, 0);
        let deliveries = sink.deliveries.lock().clone();
        let markers: Vec<_> = deliveries.iter().map(|d| d.marker.as_str()).collect();
        assert_eq!(markers, vec!["a", "b", "c"]);
        let finals: Vec<_> = deliveries.iter().map(|d| d.is_final).collect();
        assert_eq!(finals, vec![false, false, true]);
        assert!(deliveries.iter().all(|d| d.target == "http://cb"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_response_is_final() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = ReplayScheduler::new(sink.clone());

        scheduler.run("http://cb", &[response(0, "only")], base()).await;

        let deliveries = sink.deliveries.lock().clone();
        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].is_final);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_fidelity() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = ReplayScheduler::new(sink.clone());
        let responses = vec![response(0, "a"), response(2, "b"), response(5, "c")];

        let start = Instant::now();
        let summary = scheduler.run("http://cb", &responses, base()).await;

        let deliveries = sink.deliveries.lock().clone();
        assert!(deliveries[0].at - start < Duration::from_millis(10));
        assert!(deliveries[1].at - deliveries[0].at >= Duration::from_secs(2));
        assert!(deliveries[2].at - deliveries[1].at >= Duration::from_secs(3));
        assert!(summary.elapsed >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchor_uses_earlier_first_response() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = ReplayScheduler::new(sink.clone());
        // first response recorded 2s before the nominal call start
        let responses = vec![response(-2, "early"), response(1, "late")];

        let start = Instant::now();
        scheduler.run("http://cb", &responses, base()).await;

        let deliveries = sink.deliveries.lock().clone();
        assert!(deliveries[0].at - start < Duration::from_millis(10));
        assert!(deliveries[1].at - start >= Duration::from_secs(3));
    }

    #[test]
    fn test_anchor_and_offsets() {
        let responses = vec![response(4, "a")];
        assert_eq!(replay_anchor(base(), &responses), base());
        assert_eq!(replay_anchor(base(), &[]), base());

        let early = vec![response(-1, "a")];
        assert_eq!(replay_anchor(base(), &early), early[0].timestamp);

        assert_eq!(
            offset_from(base(), base() + chrono::Duration::milliseconds(1500)),
            Duration::from_millis(1500)
        );
        assert_eq!(
            offset_from(base(), base() - chrono::Duration::seconds(1)),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_abort_schedule() {
        let sink = Arc::new(RecordingSink {
            fail_markers: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        });
        let scheduler = ReplayScheduler::new(sink.clone());
        let responses = vec![response(0, "a"), response(1, "b"), response(2, "c")];

        let summary = scheduler.run("http://cb", &responses, base()).await;

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.delivered, 1);
        let deliveries = sink.deliveries.lock().clone();
        assert_eq!(deliveries.len(), 3);
        assert!(deliveries[2].is_final);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_only_delivers_nothing() {
        let responses = vec![response(0, "a"), response(2, "b"), response(5, "c")];

        let start = Instant::now();
        let summary = ReplayScheduler::delays_only(&responses, base()).await;

        assert_eq!(summary.delivered, 0);
        assert_eq!(summary.failed, 0);
        assert!(Instant::now() - start >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_responses_return_immediately() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = ReplayScheduler::new(sink.clone());

        let summary = scheduler.run("http://cb", &[], base()).await;

        assert_eq!(summary, ReplaySummary::default());
        assert!(sink.deliveries.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_detached() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = ReplayScheduler::new(sink.clone());
        let responses = vec![response(0, "a"), response(10, "b")];

        let handle = scheduler.schedule("http://cb".to_string(), responses, base());
        // the caller is not blocked by the 10s schedule
        assert!(sink.deliveries.lock().len() < 2);

        let summary = handle.await.unwrap();
        assert_eq!(summary.delivered, 2);
        assert_eq!(sink.deliveries.lock().len(), 2);
    }

    #[test]
    fn test_delivery_error_retryable() {
        assert!(DeliveryError::Network("reset".into()).is_retryable());
        assert!(DeliveryError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(!DeliveryError::Status { status: 404, body: String::new() }.is_retryable());
        assert!(!DeliveryError::InvalidTarget("x".into()).is_retryable());
    }
}
