//! HTTP provider gateway sender.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{ChannelSender, SendResult};
use crate::domain::Channel;
use crate::notification::job::NotificationJob;
use crate::notification::template::RenderedMessage;

/// Provider gateway configuration for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    pub channel: Channel,
    /// Gateway endpoint receiving a JSON POST per message.
    pub url: String,
    /// Bearer token, if the gateway requires one.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    15
}

impl HttpProviderConfig {
    pub fn new(channel: Channel, url: impl Into<String>) -> Self {
        Self {
            channel,
            url: url.into(),
            auth_token: None,
            timeout_secs: default_timeout(),
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.trim().is_empty());
        self
    }
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(alias = "id")]
    message_id: Option<String>,
}

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Classify a non-success gateway status.
///
/// Rejections of the destination itself are permanent; throttling and
/// server-side failures may succeed later.
pub(crate) fn classify_status(status: StatusCode) -> SendResult {
    let reason = format!("provider responded {status}");
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::GONE
        | StatusCode::UNPROCESSABLE_ENTITY => SendResult::permanent(reason),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SendResult::retryable(reason)
        }
        s if s.is_server_error() => SendResult::retryable(reason),
        _ => SendResult::unclassified(reason),
    }
}

/// Sends one channel's messages through an HTTP gateway.
pub struct HttpProviderSender {
    config: HttpProviderConfig,
    client: Client,
    name: String,
}

impl HttpProviderSender {
    pub fn new(config: HttpProviderConfig) -> Self {
        install_rustls_provider();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        let name = format!("http-{}", config.channel.as_str().to_ascii_lowercase());
        Self {
            config,
            client,
            name,
        }
    }

    fn build_payload(&self, job: &NotificationJob, message: &RenderedMessage) -> serde_json::Value {
        json!({
            "job_id": job.id,
            "emergency_id": job.emergency_id,
            "channel": job.channel,
            "priority": job.priority,
            "to": job.destination(),
            "recipient_name": job.recipient_name,
            "subject": message.subject,
            "body": message.body,
            "deep_link": job.template.deep_link,
        })
    }
}

#[async_trait]
impl ChannelSender for HttpProviderSender {
    fn channel(&self) -> Channel {
        self.config.channel
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, job: &NotificationJob, message: &RenderedMessage) -> SendResult {
        if job.destination().is_none() {
            return SendResult::permanent(format!("no {} destination", job.channel));
        }

        let mut request = self
            .client
            .post(&self.config.url)
            .json(&self.build_payload(job, message));
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(job_id = %job.id, provider = %self.name, error = %e, "Provider request failed");
                return SendResult::retryable(format!("provider request failed: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let result = classify_status(status);
            warn!(
                job_id = %job.id,
                provider = %self.name,
                %status,
                error_class = ?result.error_class,
                "Provider rejected message"
            );
            return result;
        }

        let message_id = response
            .json::<ProviderResponse>()
            .await
            .ok()
            .and_then(|r| r.message_id);
        debug!(job_id = %job.id, provider = %self.name, ?message_id, "Message accepted by provider");
        SendResult::sent(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::channels::ErrorClass;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_status(StatusCode::GONE).error_class,
            Some(ErrorClass::Permanent)
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND).error_class,
            Some(ErrorClass::Permanent)
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS).error_class,
            Some(ErrorClass::Retryable)
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY).error_class,
            Some(ErrorClass::Retryable)
        );
        let unknown = classify_status(StatusCode::FORBIDDEN);
        assert_eq!(unknown.error_class, None);
        assert_eq!(unknown.effective_error_class(), Some(ErrorClass::Retryable));
    }

    #[test]
    fn test_blank_auth_token_dropped() {
        let config = HttpProviderConfig::new(Channel::Sms, "http://localhost:9000/sms")
            .with_auth_token(Some("  ".into()));
        assert!(config.auth_token.is_none());
        assert_eq!(config.timeout_secs, 15);
    }
}
