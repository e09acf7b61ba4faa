//! Emergency and acknowledgment database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{
    datetime_to_ms, ms_to_datetime, opt_datetime_to_ms, opt_ms_to_datetime,
};
use crate::domain::{Acknowledgment, Emergency, EmergencyStatus, EmergencyType};
use crate::{Error, Result};

/// Row of the `emergencies` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmergencyDbModel {
    pub id: String,
    pub user_id: String,
    pub emergency_type: String,
    /// PENDING, ACTIVE, CANCELLED, RESOLVED
    pub status: String,
    /// JSON encoded `Location`
    pub initial_location: String,
    pub initial_message: Option<String>,
    pub auto_triggered: bool,
    pub triggered_by: String,
    pub countdown_seconds: i64,
    pub created_at: i64,
    pub activated_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub resolved_at: Option<i64>,
    pub resolution_notes: Option<String>,
    /// JSON blob
    pub metadata: Option<String>,
}

impl EmergencyDbModel {
    pub fn from_domain(emergency: &Emergency) -> Result<Self> {
        Ok(Self {
            id: emergency.id.clone(),
            user_id: emergency.user_id.clone(),
            emergency_type: emergency.emergency_type.as_str().to_string(),
            status: emergency.status.as_str().to_string(),
            initial_location: serde_json::to_string(&emergency.initial_location)?,
            initial_message: emergency.initial_message.clone(),
            auto_triggered: emergency.auto_triggered,
            triggered_by: emergency.triggered_by.clone(),
            countdown_seconds: emergency.countdown_seconds,
            created_at: datetime_to_ms(emergency.created_at),
            activated_at: opt_datetime_to_ms(emergency.activated_at),
            cancelled_at: opt_datetime_to_ms(emergency.cancelled_at),
            resolved_at: opt_datetime_to_ms(emergency.resolved_at),
            resolution_notes: emergency.resolution_notes.clone(),
            metadata: emergency
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        })
    }

    pub fn into_domain(self) -> Result<Emergency> {
        let status = EmergencyStatus::parse(&self.status).ok_or_else(|| {
            Error::Database(format!("unknown emergency status '{}'", self.status))
        })?;
        let emergency_type = self.emergency_type.parse::<EmergencyType>().map_err(|_| {
            Error::Database(format!("unknown emergency type '{}'", self.emergency_type))
        })?;

        Ok(Emergency {
            id: self.id,
            user_id: self.user_id,
            emergency_type,
            status,
            initial_location: serde_json::from_str(&self.initial_location)?,
            initial_message: self.initial_message,
            auto_triggered: self.auto_triggered,
            triggered_by: self.triggered_by,
            countdown_seconds: self.countdown_seconds,
            created_at: ms_to_datetime(self.created_at),
            activated_at: opt_ms_to_datetime(self.activated_at),
            cancelled_at: opt_ms_to_datetime(self.cancelled_at),
            resolved_at: opt_ms_to_datetime(self.resolved_at),
            resolution_notes: self.resolution_notes,
            metadata: self
                .metadata
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
        })
    }
}

/// Row of the `emergency_acknowledgments` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AcknowledgmentDbModel {
    pub id: String,
    pub emergency_id: String,
    pub contact_id: String,
    pub contact_name: String,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub acknowledged_at: i64,
    /// JSON encoded `Location`
    pub location: Option<String>,
    pub message: Option<String>,
}

impl AcknowledgmentDbModel {
    pub fn from_domain(ack: &Acknowledgment) -> Result<Self> {
        Ok(Self {
            id: ack.id.clone(),
            emergency_id: ack.emergency_id.clone(),
            contact_id: ack.contact_id.clone(),
            contact_name: ack.contact_name.clone(),
            contact_phone: ack.contact_phone.clone(),
            contact_email: ack.contact_email.clone(),
            acknowledged_at: datetime_to_ms(ack.acknowledged_at),
            location: ack.location.as_ref().map(serde_json::to_string).transpose()?,
            message: ack.message.clone(),
        })
    }

    pub fn into_domain(self) -> Result<Acknowledgment> {
        Ok(Acknowledgment {
            id: self.id,
            emergency_id: self.emergency_id,
            contact_id: self.contact_id,
            contact_name: self.contact_name,
            contact_phone: self.contact_phone,
            contact_email: self.contact_email,
            acknowledged_at: ms_to_datetime(self.acknowledged_at),
            location: self
                .location
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            message: self.message,
        })
    }
}
