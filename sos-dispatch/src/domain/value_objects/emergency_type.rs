//! Emergency category.

use serde::{Deserialize, Serialize};

use super::Priority;

/// Category of an emergency.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EmergencyType {
    Medical,
    Fire,
    Police,
    General,
    FallDetected,
    DeviceAlert,
}

impl EmergencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medical => "MEDICAL",
            Self::Fire => "FIRE",
            Self::Police => "POLICE",
            Self::General => "GENERAL",
            Self::FallDetected => "FALL_DETECTED",
            Self::DeviceAlert => "DEVICE_ALERT",
        }
    }

    /// Dispatch priority for notifications about this kind of emergency.
    pub fn priority(&self) -> Priority {
        match self {
            Self::Medical | Self::Fire | Self::Police => Priority::Emergency,
            Self::FallDetected | Self::General => Priority::High,
            Self::DeviceAlert => Priority::Medium,
        }
    }

    /// Human readable label used in message templates.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Medical => "Medical emergency",
            Self::Fire => "Fire",
            Self::Police => "Police emergency",
            Self::General => "Emergency",
            Self::FallDetected => "Fall detected",
            Self::DeviceAlert => "Device alert",
        }
    }
}
