//! Message templates rendered per channel.

use serde::{Deserialize, Serialize};

use crate::domain::{Channel, Emergency};

/// Values substituted into every channel's message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFields {
    pub user_name: String,
    pub emergency_type: String,
    pub location_text: String,
    pub deep_link: String,
}

impl TemplateFields {
    pub fn for_emergency(emergency: &Emergency, user_name: &str, deep_link_base: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            emergency_type: emergency.emergency_type.label().to_string(),
            location_text: emergency.initial_location.display_text(),
            deep_link: format!("{}/{}", deep_link_base.trim_end_matches('/'), emergency.id),
        }
    }

    /// Render the message for `channel`.
    pub fn render(&self, channel: Channel) -> RenderedMessage {
        match channel {
            Channel::Push => RenderedMessage {
                subject: Some(format!("{}: {}", self.emergency_type, self.user_name)),
                body: format!(
                    "{} needs help near {}. Tap to respond.",
                    self.user_name, self.location_text
                ),
            },
            // SMS has no subject and should stay within a single segment where possible.
            Channel::Sms => RenderedMessage {
                subject: None,
                body: format!(
                    "SOS: {} - {} near {}. Respond: {}",
                    self.emergency_type, self.user_name, self.location_text, self.deep_link
                ),
            },
            Channel::Email => RenderedMessage {
                subject: Some(format!(
                    "[SOS] {} needs help ({})",
                    self.user_name, self.emergency_type
                )),
                body: format!(
                    "{user} has triggered an emergency alert.\n\nType: {kind}\nLast known location: {location}\n\nOpen the alert to acknowledge: {link}\n\nYou are receiving this because you are listed as an emergency contact.",
                    user = self.user_name,
                    kind = self.emergency_type,
                    location = self.location_text,
                    link = self.deep_link,
                ),
            },
        }
    }
}

/// Channel-specific rendering of a job's template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
}
