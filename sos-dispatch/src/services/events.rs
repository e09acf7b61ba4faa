//! Emergency lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::EmergencyType;

/// Events emitted by the emergency service after each committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmergencyEvent {
    Triggered {
        emergency_id: String,
        user_id: String,
        emergency_type: EmergencyType,
        countdown_seconds: i64,
        auto_triggered: bool,
        timestamp: DateTime<Utc>,
    },
    Activated {
        emergency_id: String,
        user_id: String,
        /// Jobs created by the activation fan-out.
        notified_contacts: usize,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        emergency_id: String,
        user_id: String,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Resolved {
        emergency_id: String,
        user_id: String,
        duration_seconds: Option<i64>,
        timestamp: DateTime<Utc>,
    },
    ContactAcknowledged {
        emergency_id: String,
        contact_id: String,
        contact_name: String,
        timestamp: DateTime<Utc>,
    },
}

impl EmergencyEvent {
    pub fn emergency_id(&self) -> &str {
        match self {
            Self::Triggered { emergency_id, .. }
            | Self::Activated { emergency_id, .. }
            | Self::Cancelled { emergency_id, .. }
            | Self::Resolved { emergency_id, .. }
            | Self::ContactAcknowledged { emergency_id, .. } => emergency_id,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Triggered {
                emergency_type,
                countdown_seconds,
                ..
            } => format!(
                "{} emergency triggered ({}s countdown)",
                emergency_type.label(),
                countdown_seconds
            ),
            Self::Activated {
                notified_contacts, ..
            } => format!("Emergency activated, {} contacts notified", notified_contacts),
            Self::Cancelled { reason, .. } => match reason {
                Some(reason) => format!("Emergency cancelled: {}", reason),
                None => "Emergency cancelled".to_string(),
            },
            Self::Resolved {
                duration_seconds, ..
            } => match duration_seconds {
                Some(secs) => format!("Emergency resolved after {}s", secs),
                None => "Emergency resolved".to_string(),
            },
            Self::ContactAcknowledged { contact_name, .. } => {
                format!("{} acknowledged the emergency", contact_name)
            }
        }
    }
}

/// Broadcaster for emergency lifecycle events.
#[derive(Clone)]
pub struct EmergencyEventBroadcaster {
    sender: broadcast::Sender<EmergencyEvent>,
}

impl EmergencyEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EmergencyEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscriber is not an error.
    pub fn publish(&self, event: EmergencyEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EmergencyEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
