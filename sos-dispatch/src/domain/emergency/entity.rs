//! Emergency entity.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::EmergencyStatus;
use crate::domain::{EmergencyType, Location};
use crate::{Error, Result};

/// One help request and its lifecycle timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emergency {
    pub id: String,
    pub user_id: String,
    pub emergency_type: EmergencyType,
    pub status: EmergencyStatus,
    pub initial_location: Location,
    pub initial_message: Option<String>,
    pub auto_triggered: bool,
    /// `user`, `device:<id>` or `system`.
    pub triggered_by: String,
    /// Seconds before a PENDING emergency auto-activates.
    pub countdown_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl Emergency {
    /// Create a new PENDING emergency.
    pub fn new(
        user_id: impl Into<String>,
        emergency_type: EmergencyType,
        initial_location: Location,
        countdown_seconds: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            emergency_type,
            status: EmergencyStatus::Pending,
            initial_location,
            initial_message: None,
            auto_triggered: false,
            triggered_by: "user".to_string(),
            countdown_seconds,
            created_at: Utc::now(),
            activated_at: None,
            cancelled_at: None,
            resolved_at: None,
            resolution_notes: None,
            metadata: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.initial_message = Some(message.into());
        self
    }

    pub fn with_trigger(mut self, triggered_by: impl Into<String>, auto_triggered: bool) -> Self {
        self.triggered_by = triggered_by.into();
        self.auto_triggered = auto_triggered;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::validation("user_id is required"));
        }
        if self.triggered_by.trim().is_empty() {
            return Err(Error::validation("triggered_by is required"));
        }
        if self.countdown_seconds < 0 {
            return Err(Error::validation("countdown_seconds must be non-negative"));
        }
        self.initial_location.validate()
    }

    pub fn is_active(&self) -> bool {
        self.status == EmergencyStatus::Active
    }

    pub fn is_pending(&self) -> bool {
        self.status == EmergencyStatus::Pending
    }

    pub fn can_be_cancelled(&self) -> bool {
        self.status.can_transition_to(EmergencyStatus::Cancelled)
    }

    pub fn can_be_resolved(&self) -> bool {
        self.status.can_transition_to(EmergencyStatus::Resolved)
    }

    /// Apply a transition and stamp the matching timestamp.
    ///
    /// On error the entity is left untouched.
    pub fn transition(&mut self, target: EmergencyStatus, at: DateTime<Utc>) -> Result<()> {
        self.status = self.status.transition_to(target)?;
        match target {
            EmergencyStatus::Active => self.activated_at = Some(at),
            EmergencyStatus::Cancelled => self.cancelled_at = Some(at),
            EmergencyStatus::Resolved => self.resolved_at = Some(at),
            EmergencyStatus::Pending => {}
        }
        Ok(())
    }

    pub fn activate(&mut self) -> Result<()> {
        self.transition(EmergencyStatus::Active, Utc::now())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(EmergencyStatus::Cancelled, Utc::now())
    }

    /// Resolve with required notes.
    pub fn resolve(&mut self, notes: &str) -> Result<()> {
        let notes = notes.trim();
        if notes.is_empty() {
            return Err(Error::validation("resolution notes are required"));
        }
        self.transition(EmergencyStatus::Resolved, Utc::now())?;
        self.resolution_notes = Some(notes.to_string());
        Ok(())
    }

    /// Time since activation, up to resolution if resolved.
    pub fn duration(&self) -> Option<Duration> {
        let activated_at = self.activated_at?;
        let end = self.resolved_at.unwrap_or_else(Utc::now);
        Some(end - activated_at)
    }
}
