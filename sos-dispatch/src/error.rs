//! Application-wide error types.

use thiserror::Error;

/// Result type alias using the application error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid transition: cannot transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("User {user_id} already has an active emergency")]
    EmergencyAlreadyActive { user_id: String },

    #[error("Contact {contact_id} already acknowledged emergency {emergency_id}")]
    DuplicateAcknowledgment {
        emergency_id: String,
        contact_id: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed notification job: {0}")]
    MalformedJob(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Rejected synchronously with no side effect.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::Validation(_) | Self::MalformedJob(_)
        )
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Self::DuplicateAcknowledgment { .. } | Self::EmergencyAlreadyActive { .. }
        )
    }

    /// Storage or IO failure that the caller has to handle.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::DatabaseSqlx(_) | Self::Database(_) | Self::Migration(_) | Self::Io(_)
        )
    }
}
