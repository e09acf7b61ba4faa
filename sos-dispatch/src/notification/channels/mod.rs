//! Channel senders.
//!
//! The concrete transports (push gateway, SMS provider, mail relay) live
//! outside this crate; a sender adapts one of them to the [`ChannelSender`]
//! contract:
//! - [`LogSender`]: dry run, logs the rendered message and reports success
//! - [`HttpProviderSender`]: POSTs the message to a provider gateway over HTTP

mod dry_run;
mod http;

pub use dry_run::LogSender;
pub use http::{HttpProviderConfig, HttpProviderSender};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::job::NotificationJob;
use super::template::RenderedMessage;
use crate::domain::Channel;

/// Classification of a delivery failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// Bad, expired or unregistered destination. Never retried.
    Permanent,
    /// Timeout, rate limit or transient provider error.
    Retryable,
}

/// Outcome of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error_class: Option<ErrorClass>,
    pub error: Option<String>,
}

impl SendResult {
    pub fn sent(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error_class: None,
            error: None,
        }
    }

    pub fn permanent(error: impl Into<String>) -> Self {
        Self::failed(error, Some(ErrorClass::Permanent))
    }

    pub fn retryable(error: impl Into<String>) -> Self {
        Self::failed(error, Some(ErrorClass::Retryable))
    }

    /// Failure without a classification.
    pub fn unclassified(error: impl Into<String>) -> Self {
        Self::failed(error, None)
    }

    fn failed(error: impl Into<String>, error_class: Option<ErrorClass>) -> Self {
        Self {
            success: false,
            message_id: None,
            error_class,
            error: Some(error.into()),
        }
    }

    /// Unclassified failures are treated as retryable.
    pub fn effective_error_class(&self) -> Option<ErrorClass> {
        if self.success {
            None
        } else {
            Some(self.error_class.unwrap_or(ErrorClass::Retryable))
        }
    }
}

/// Delivers rendered messages over one channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel this sender delivers on.
    fn channel(&self) -> Channel;

    /// Name used in logs.
    fn name(&self) -> &str;

    /// Attempt delivery of `message` to the job's destination.
    async fn send(&self, job: &NotificationJob, message: &RenderedMessage) -> SendResult;
}

/// Channel → sender lookup used by the dispatcher.
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender, replacing any previous sender for its channel.
    pub fn register(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&channel)
    }

    pub fn channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.senders.contains_key(c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclassified_failure_is_retryable() {
        let result = SendResult::unclassified("boom");
        assert!(!result.success);
        assert_eq!(result.error_class, None);
        assert_eq!(result.effective_error_class(), Some(ErrorClass::Retryable));
    }

    #[test]
    fn test_success_has_no_error_class() {
        let result = SendResult::sent(Some("m-1".into()));
        assert_eq!(result.effective_error_class(), None);
        assert_eq!(result.message_id.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_registry_replaces_per_channel() {
        let registry = SenderRegistry::new()
            .register(Arc::new(LogSender::new(Channel::Sms)))
            .register(Arc::new(LogSender::new(Channel::Sms)))
            .register(Arc::new(LogSender::new(Channel::Email)));
        assert_eq!(registry.channels(), vec![Channel::Sms, Channel::Email]);
        assert!(registry.get(Channel::Push).is_none());
    }
}
