//! Delivery channels and contact destinations.

use serde::{Deserialize, Serialize};

/// A delivery medium.
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
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Channel {
    Push,
    Sms,
    Email,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Push, Channel::Sms, Channel::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "PUSH",
            Self::Sms => "SMS",
            Self::Email => "EMAIL",
        }
    }

    /// Next channel to try once this one is exhausted.
    pub fn fallback(&self) -> Option<Channel> {
        match self {
            Self::Push => Some(Self::Sms),
            Self::Sms => Some(Self::Email),
            Self::Email => None,
        }
    }
}

/// Addresses known for a contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
}

impl ContactInfo {
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_push_token(mut self, token: impl Into<String>) -> Self {
        self.push_token = Some(token.into());
        self
    }

    /// Destination address for `channel`, ignoring blank values.
    pub fn destination_for(&self, channel: Channel) -> Option<&str> {
        let value = match channel {
            Channel::Push => self.push_token.as_deref(),
            Channel::Sms => self.phone.as_deref(),
            Channel::Email => self.email.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    /// First channel with a usable destination, in PUSH, SMS, EMAIL order.
    pub fn primary_channel(&self) -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|channel| self.destination_for(*channel).is_some())
    }

    /// Fallback channel after `channel` is exhausted, if the contact has an address for it.
    pub fn fallback_after(&self, channel: Channel) -> Option<Channel> {
        channel
            .fallback()
            .filter(|next| self.destination_for(*next).is_some())
    }
}
