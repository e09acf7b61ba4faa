//! Emergency lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Emergency lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmergencyStatus {
    /// Countdown running, the user can still abort.
    #[default]
    Pending,
    /// Emergency confirmed, contacts are being notified.
    Active,
    /// Aborted by the user.
    Cancelled,
    /// Outcome recorded.
    Resolved,
}

impl EmergencyStatus {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Cancelled => "CANCELLED",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "ACTIVE" => Some(Self::Active),
            "CANCELLED" => Some(Self::Cancelled),
            "RESOLVED" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// CANCELLED and RESOLVED are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Resolved)
    }

    /// PENDING or ACTIVE, the states that count against the per-user limit.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }

    /// Only an ACTIVE emergency is dispatched to and monitored for escalation.
    pub fn is_escalatable(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: EmergencyStatus) -> bool {
        use EmergencyStatus::*;

        matches!(
            (self, target),
            (Pending, Active) | (Pending, Cancelled) | (Active, Cancelled) | (Active, Resolved)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: EmergencyStatus) -> Result<EmergencyStatus, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::invalid_transition(self.as_str(), target.as_str()))
        }
    }
}

impl std::fmt::Display for EmergencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EmergencyStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::validation(format!("invalid status: {s}")))
    }
}
