//! Per-send delivery records and the sinks that receive them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::message::ProviderId;
use crate::outcome::{AttemptRecord, Outcome, RouteDecision};

/// Summary of one completed send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub channel: String,
    /// Provider chosen to lead the attempt sequence, and in which role.
    pub chosen_provider: RouteDecision,
    pub attempts: Vec<AttemptRecord>,
    /// What `send` returned.
    pub final_outcome: Outcome,
    pub started_at: DateTime<Utc>,
    #[serde(with = "crate::outcome::duration_ms")]
    pub duration: Duration,
}

impl DeliveryRecord {
    /// Provider that produced the final outcome, if any was contacted.
    pub fn final_provider(&self) -> Option<&ProviderId> {
        match &self.final_outcome {
            Outcome::Success(receipt) => Some(&receipt.provider),
            Outcome::Failure(failure) => failure.provider.as_ref(),
        }
    }

    pub fn provider_contacts(&self) -> usize {
        self.attempts.iter().filter(|a| a.contacted_provider()).count()
    }
}

/// Receives one record per completed send.
///
/// Called inline on the sending task after the outcome is known; an
/// implementation must not block.
pub trait DeliverySink: Send + Sync {
    fn record(&self, record: &DeliveryRecord);
}

/// Writes one structured log line per send.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DeliverySink for TracingSink {
    fn record(&self, record: &DeliveryRecord) {
        let chosen = record.chosen_provider.provider.as_str();
        let duration_ms = record.duration.as_millis() as u64;
        let attempts = record.attempts.len();
        match &record.final_outcome {
            Outcome::Success(receipt) => info!(
                channel = %record.channel,
                chosen_provider = chosen,
                role = %record.chosen_provider.role,
                attempts,
                final_outcome = "success",
                provider = %receipt.provider,
                receipt = %receipt.id,
                duration_ms,
                "message delivered"
            ),
            Outcome::Failure(failure) => warn!(
                channel = %record.channel,
                chosen_provider = chosen,
                role = %record.chosen_provider.role,
                attempts,
                final_outcome = %failure.kind,
                duration_ms,
                "delivery failed: {}",
                failure.detail
            ),
        }
    }
}

/// Publishes records on a broadcast channel for live subscribers.
///
/// Records are dropped while nobody is subscribed; slow subscribers see
/// `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<DeliveryRecord>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryRecord> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl DeliverySink for BroadcastSink {
    fn record(&self, record: &DeliveryRecord) {
        let _ = self.tx.send(record.clone());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DeliverySink for NoopSink {
    fn record(&self, _record: &DeliveryRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{FailureKind, RouteRole};

    fn record(outcome: Outcome) -> DeliveryRecord {
        DeliveryRecord {
            channel: "sms".to_string(),
            chosen_provider: RouteDecision {
                provider: ProviderId::new("vendor_a"),
                role: RouteRole::Primary,
            },
            attempts: vec![AttemptRecord {
                provider: ProviderId::new("vendor_a"),
                role: RouteRole::Primary,
                attempt: 1,
                outcome: outcome.clone(),
                elapsed: Duration::from_millis(12),
            }],
            final_outcome: outcome,
            started_at: Utc::now(),
            duration: Duration::from_millis(15),
        }
    }

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 1);

        sink.record(&record(Outcome::success(ProviderId::new("vendor_a"), "r-1")));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.channel, "sms");
        assert_eq!(received.final_provider().unwrap().as_str(), "vendor_a");
    }

    #[test]
    fn broadcast_sink_without_subscribers_does_not_fail() {
        let sink = BroadcastSink::default();
        sink.record(&record(Outcome::success(ProviderId::new("vendor_a"), "r-1")));
        NoopSink.record(&record(Outcome::success(ProviderId::new("vendor_a"), "r-1")));
        TracingSink.record(&record(Outcome::failure(
            FailureKind::Timeout,
            Some(ProviderId::new("vendor_a")),
            "no response within 10ms",
        )));
    }

    #[test]
    fn record_serializes_field_names_and_millis() {
        let json = serde_json::to_value(record(Outcome::failure(
            FailureKind::RateLimited,
            None,
            "gate closed",
        )))
        .unwrap();
        assert_eq!(json["duration"], 15);
        assert_eq!(json["attempts"][0]["elapsed"], 12);
        assert_eq!(json["final_outcome"]["kind"], "rate_limited");
        assert_eq!(json["chosen_provider"]["provider"], "vendor_a");
        assert_eq!(json["chosen_provider"]["role"], "primary");
        assert_eq!(json["channel"], "sms");
    }

    #[test]
    fn rate_limited_record_has_no_final_provider() {
        let record = record(Outcome::failure(FailureKind::RateLimited, None, "gate closed"));
        assert!(record.final_provider().is_none());
    }
}
