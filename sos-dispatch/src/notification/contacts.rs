//! Emergency contact lookup.
//!
//! Contact management lives outside the engine; the dispatcher only needs
//! the list of contacts to alert for a user and the user's display name.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::domain::ContactInfo;

/// One person to alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub contact: ContactInfo,
}

impl EmergencyContact {
    pub fn new(id: impl Into<String>, name: impl Into<String>, contact: ContactInfo) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            contact,
        }
    }
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn emergency_contacts(&self, user_id: &str) -> Result<Vec<EmergencyContact>>;

    /// Name shown to contacts in alerts.
    async fn display_name(&self, user_id: &str) -> Result<Option<String>>;
}

/// Entry of the contacts file.
#[derive(Debug, Clone, Deserialize)]
struct UserContacts {
    user_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    contacts: Vec<EmergencyContact>,
}

/// Contact directory held in memory, optionally loaded from a JSON file.
#[derive(Default)]
pub struct InMemoryContactDirectory {
    contacts: DashMap<String, Vec<EmergencyContact>>,
    names: DashMap<String, String>,
}

impl InMemoryContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of `{ user_id, name?, contacts: [...] }` entries.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let entries: Vec<UserContacts> = serde_json::from_str(&raw)?;

        let directory = Self::new();
        for entry in entries {
            if let Some(name) = entry.name {
                directory.set_display_name(&entry.user_id, name);
            }
            directory.set_contacts(&entry.user_id, entry.contacts);
        }
        Ok(directory)
    }

    pub fn set_contacts(&self, user_id: &str, contacts: Vec<EmergencyContact>) {
        self.contacts.insert(user_id.to_string(), contacts);
    }

    pub fn add_contact(&self, user_id: &str, contact: EmergencyContact) {
        self.contacts
            .entry(user_id.to_string())
            .or_default()
            .push(contact);
    }

    pub fn set_display_name(&self, user_id: &str, name: impl Into<String>) {
        self.names.insert(user_id.to_string(), name.into());
    }

    pub fn user_count(&self) -> usize {
        self.contacts.len()
    }
}

#[async_trait]
impl ContactDirectory for InMemoryContactDirectory {
    async fn emergency_contacts(&self, user_id: &str) -> Result<Vec<EmergencyContact>> {
        Ok(self
            .contacts
            .get(user_id)
            .map(|c| c.value().clone())
            .unwrap_or_default())
    }

    async fn display_name(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.names.get(user_id).map(|n| n.value().clone()))
    }
}
