//! Intervention sinks: where decided interventions are handed off
//!
//! A sink only transports decisions. User responses come back separately
//! through `SessionHub::respond`.

use crate::escalation::InterventionDecision;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Error type for sink operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("Sink unreachable: {0}")]
    Unreachable(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Acknowledgement from a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub sink: String,
    /// Subscribers that received the decision
    pub receivers: usize,
    pub delivered_at: DateTime<Utc>,
}

/// Shared reference to a sink
pub type SharedSink = Arc<dyn InterventionSink>;

/// Hands decided interventions to the user-facing side
#[async_trait]
pub trait InterventionSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, decision: &InterventionDecision) -> SinkResult<DeliveryResult>;
}

/// Fans decisions out to UI subscribers over a broadcast channel.
///
/// Delivery fails while nobody is subscribed, so the decision stays pending
/// until a UI attaches.
pub struct BroadcastSink {
    sender: broadcast::Sender<InterventionDecision>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to receive decisions
    pub fn subscribe(&self) -> broadcast::Receiver<InterventionDecision> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InterventionSink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn deliver(&self, decision: &InterventionDecision) -> SinkResult<DeliveryResult> {
        match self.sender.send(decision.clone()) {
            Ok(receivers) => {
                debug!(
                    session_id = %decision.session_id,
                    tier = %decision.tier,
                    receivers,
                    "Intervention broadcast"
                );
                Ok(DeliveryResult {
                    sink: self.name().to_string(),
                    receivers,
                    delivered_at: Utc::now(),
                })
            }
            Err(_) => Err(SinkError::Unreachable("no subscribers".to_string())),
        }
    }
}

/// Writes decisions to the structured log and always succeeds
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl InterventionSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, decision: &InterventionDecision) -> SinkResult<DeliveryResult> {
        info!(
            session_id = %decision.session_id,
            decision_id = %decision.id,
            label = %decision.label,
            tier = %decision.tier,
            reason = %decision.reason,
            "Intervention delivered"
        );
        Ok(DeliveryResult {
            sink: self.name().to_string(),
            receivers: 1,
            delivered_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::{DecisionReason, InterventionTier};
    use crate::pattern::Label;
    use uuid::Uuid;

    fn decision() -> InterventionDecision {
        let now = Utc::now();
        InterventionDecision {
            id: Uuid::new_v4(),
            session_id: "s1".to_string(),
            timestamp: now,
            label: Label::F,
            label_since: now,
            tier: InterventionTier::Tier1,
            reason: DecisionReason::Escalated,
            suppressed_until: None,
            deliver: true,
        }
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_unreachable() {
        let sink = BroadcastSink::new();
        let err = sink.deliver(&decision()).await.unwrap_err();
        assert!(matches!(err, SinkError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();
        let sent = decision();
        let result = sink.deliver(&sent).await.unwrap();
        assert_eq!(result.receivers, 1);
        assert_eq!(rx.recv().await.unwrap().id, sent.id);
    }

    #[tokio::test]
    async fn test_log_sink_always_delivers() {
        let result = LogSink.deliver(&decision()).await.unwrap();
        assert_eq!(result.sink, "log");
    }
}
