//! Dry-run sender.

use async_trait::async_trait;
use tracing::info;

use super::{ChannelSender, SendResult};
use crate::domain::Channel;
use crate::notification::job::NotificationJob;
use crate::notification::template::RenderedMessage;

/// Logs every message and reports it as sent.
///
/// Used when no provider is configured for a channel.
pub struct LogSender {
    channel: Channel,
    name: String,
}

impl LogSender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            name: format!("log-{}", channel.as_str().to_ascii_lowercase()),
        }
    }
}

#[async_trait]
impl ChannelSender for LogSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, job: &NotificationJob, message: &RenderedMessage) -> SendResult {
        info!(
            job_id = %job.id,
            emergency_id = %job.emergency_id,
            channel = %self.channel,
            recipient = %job.recipient_name,
            subject = message.subject.as_deref().unwrap_or(""),
            "{}",
            message.body
        );
        SendResult::sent(Some(format!("dry-run-{}", job.id)))
    }
}
