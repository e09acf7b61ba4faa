//! Contact acknowledgment of an emergency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Location;
use crate::{Error, Result};

/// A contact's recorded confirmation of awareness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub id: String,
    pub emergency_id: String,
    pub contact_id: String,
    pub contact_name: String,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub acknowledged_at: DateTime<Utc>,
    /// Where the contact was when acknowledging.
    pub location: Option<Location>,
    pub message: Option<String>,
}

impl Acknowledgment {
    pub fn new(
        emergency_id: impl Into<String>,
        contact_id: impl Into<String>,
        contact_name: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            emergency_id: emergency_id.into(),
            contact_id: contact_id.into(),
            contact_name: contact_name.into(),
            contact_phone: None,
            contact_email: None,
            acknowledged_at: Utc::now(),
            location: None,
            message: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.contact_phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.contact_email = Some(email.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.emergency_id.trim().is_empty() {
            return Err(Error::validation("emergency_id is required"));
        }
        if self.contact_id.trim().is_empty() {
            return Err(Error::validation("contact_id is required"));
        }
        if self.contact_name.trim().is_empty() {
            return Err(Error::validation("contact_name is required"));
        }
        if self.contact_phone.is_none() && self.contact_email.is_none() {
            return Err(Error::validation(
                "at least one contact method (phone or email) is required",
            ));
        }
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }
}
