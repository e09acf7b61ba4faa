//! Escalation events.
//!
//! Emitted once per unacknowledged timer expiry. Consumers (secondary
//! contact alerting, emergency services hand-off) subscribe to the
//! broadcaster; delivery of their follow-up actions is not handled here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why an emergency was escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EscalationReason {
    /// The escalation timeout elapsed without any contact acknowledging.
    NoAcknowledgment,
}

/// Escalation decision for one emergency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub emergency_id: String,
    pub reason: EscalationReason,
    pub timestamp: DateTime<Utc>,
}

impl EscalationEvent {
    pub fn no_acknowledgment(emergency_id: impl Into<String>) -> Self {
        Self {
            emergency_id: emergency_id.into(),
            reason: EscalationReason::NoAcknowledgment,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcaster for escalation events.
#[derive(Clone)]
pub struct EscalationEventBroadcaster {
    sender: broadcast::Sender<EscalationEvent>,
}

impl EscalationEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscalationEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning the number of receivers it reached.
    pub fn publish(&self, event: EscalationEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EscalationEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
