//! Engine configuration.
//!
//! Everything is read from environment variables (a `.env` file is loaded by
//! the binary first); unset or unparsable values fall back to the defaults.
//!
//! Environment variables:
//! - `DATABASE_URL` (default: `sqlite:sos-dispatch.db?mode=rwc`)
//! - `LOG_DIR` (default: `logs`)
//! - `COUNTDOWN_SECONDS`: countdown before PENDING -> ACTIVE (default: 10)
//! - `AUTO_TRIGGER_COUNTDOWN_SECONDS` (default: 30)
//! - `ESCALATION_TIMEOUT_MIN` (default: 2)
//! - `MAX_EMERGENCIES_PER_USER` (default: 1, values below 1 clamp to 1)
//! - `{PUSH,SMS,EMAIL}_MAX_ATTEMPTS`, `{..}_BASE_DELAY_MS`, `{..}_BACKOFF`
//! - `RETRY_MAX_DELAY_MS` (default: 45000)
//! - `EXPEDITED_WORKERS` / `STANDARD_WORKERS` (default: 8 / 2)
//! - `EXPEDITED_POLL_INTERVAL_MS` / `STANDARD_POLL_INTERVAL_MS` (default: 50 / 250)
//! - `SEND_TIMEOUT_SECS` (default: 30)
//! - `DEEP_LINK_BASE` (default: `sosapp://emergency`)
//! - `{PUSH,SMS,EMAIL}_PROVIDER_URL`, `PROVIDER_AUTH_TOKEN`: HTTP gateways; a
//!   channel without a URL uses the logging dry-run sender
//! - `CONTACTS_FILE`: JSON file with the users' emergency contacts

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Channel;
use crate::notification::channels::HttpProviderConfig;
use crate::notification::retry::{Backoff, ChannelRetryPolicy, RetryPolicyTable};
use crate::notification::{DispatcherConfig, WorkerPoolConfig};
use crate::services::EmergencyServiceConfig;
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:sos-dispatch.db?mode=rwc";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    pub countdown_seconds: u64,
    pub auto_trigger_countdown_seconds: u64,
    pub escalation_timeout_min: u64,
    pub max_emergencies_per_user: i64,
    pub retry: RetryPolicyTable,
    pub expedited_pool: WorkerPoolConfig,
    pub standard_pool: WorkerPoolConfig,
    pub send_timeout_secs: u64,
    pub deep_link_base: String,
    pub push_provider_url: Option<String>,
    pub sms_provider_url: Option<String>,
    pub email_provider_url: Option<String>,
    #[serde(skip_serializing)]
    pub provider_auth_token: Option<String>,
    pub contacts_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: PathBuf::from("logs"),
            countdown_seconds: 10,
            auto_trigger_countdown_seconds: 30,
            escalation_timeout_min: 2,
            max_emergencies_per_user: 1,
            retry: RetryPolicyTable::default(),
            expedited_pool: WorkerPoolConfig::expedited(),
            standard_pool: WorkerPoolConfig::standard(),
            send_timeout_secs: 30,
            deep_link_base: "sosapp://emergency".to_string(),
            push_provider_url: None,
            sms_provider_url: None,
            email_provider_url: None,
            provider_auth_token: None,
            contacts_file: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn channel_policy(
    lookup: &impl Fn(&str) -> Option<String>,
    prefix: &str,
    default: ChannelRetryPolicy,
) -> ChannelRetryPolicy {
    ChannelRetryPolicy {
        max_attempts: parsed(lookup, &format!("{}_MAX_ATTEMPTS", prefix), default.max_attempts),
        base_delay_ms: parsed(lookup, &format!("{}_BASE_DELAY_MS", prefix), default.base_delay_ms),
        backoff: parsed::<Backoff>(lookup, &format!("{}_BACKOFF", prefix), default.backoff),
    }
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let retry = RetryPolicyTable {
            push: channel_policy(&lookup, "PUSH", defaults.retry.push.clone()),
            sms: channel_policy(&lookup, "SMS", defaults.retry.sms.clone()),
            email: channel_policy(&lookup, "EMAIL", defaults.retry.email.clone()),
            max_delay_ms: parsed(&lookup, "RETRY_MAX_DELAY_MS", defaults.retry.max_delay_ms),
        };

        Self {
            database_url: non_empty(&lookup, "DATABASE_URL").unwrap_or(defaults.database_url),
            log_dir: non_empty(&lookup, "LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            countdown_seconds: parsed(&lookup, "COUNTDOWN_SECONDS", defaults.countdown_seconds),
            auto_trigger_countdown_seconds: parsed(
                &lookup,
                "AUTO_TRIGGER_COUNTDOWN_SECONDS",
                defaults.auto_trigger_countdown_seconds,
            ),
            escalation_timeout_min: parsed(
                &lookup,
                "ESCALATION_TIMEOUT_MIN",
                defaults.escalation_timeout_min,
            ),
            max_emergencies_per_user: parsed(
                &lookup,
                "MAX_EMERGENCIES_PER_USER",
                defaults.max_emergencies_per_user,
            )
            .max(1),
            retry,
            expedited_pool: WorkerPoolConfig {
                workers: parsed(&lookup, "EXPEDITED_WORKERS", defaults.expedited_pool.workers),
                poll_interval_ms: parsed(
                    &lookup,
                    "EXPEDITED_POLL_INTERVAL_MS",
                    defaults.expedited_pool.poll_interval_ms,
                ),
            },
            standard_pool: WorkerPoolConfig {
                workers: parsed(&lookup, "STANDARD_WORKERS", defaults.standard_pool.workers),
                poll_interval_ms: parsed(
                    &lookup,
                    "STANDARD_POLL_INTERVAL_MS",
                    defaults.standard_pool.poll_interval_ms,
                ),
            },
            send_timeout_secs: parsed(&lookup, "SEND_TIMEOUT_SECS", defaults.send_timeout_secs),
            deep_link_base: non_empty(&lookup, "DEEP_LINK_BASE").unwrap_or(defaults.deep_link_base),
            push_provider_url: non_empty(&lookup, "PUSH_PROVIDER_URL"),
            sms_provider_url: non_empty(&lookup, "SMS_PROVIDER_URL"),
            email_provider_url: non_empty(&lookup, "EMAIL_PROVIDER_URL"),
            provider_auth_token: non_empty(&lookup, "PROVIDER_AUTH_TOKEN"),
            contacts_file: non_empty(&lookup, "CONTACTS_FILE").map(PathBuf::from),
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.escalation_timeout_min == 0 {
            return Err(Error::config("ESCALATION_TIMEOUT_MIN must be at least 1"));
        }
        if self.expedited_pool.workers == 0 || self.standard_pool.workers == 0 {
            return Err(Error::config("each lane needs at least one worker"));
        }
        if self.send_timeout_secs == 0 {
            return Err(Error::config("SEND_TIMEOUT_SECS must be at least 1"));
        }
        for channel in Channel::ALL {
            if self.retry.for_channel(channel).max_attempts == 0 {
                return Err(Error::config(format!(
                    "{}_MAX_ATTEMPTS must be at least 1",
                    channel
                )));
            }
        }
        if self.retry.max_delay_ms == 0 {
            return Err(Error::config("RETRY_MAX_DELAY_MS must be positive"));
        }
        Ok(())
    }

    pub fn escalation_timeout(&self) -> Duration {
        Duration::from_secs(self.escalation_timeout_min.saturating_mul(60))
    }

    pub fn emergency_service(&self) -> EmergencyServiceConfig {
        EmergencyServiceConfig {
            countdown_seconds: self.countdown_seconds,
            auto_trigger_countdown_seconds: self.auto_trigger_countdown_seconds,
            max_emergencies_per_user: self.max_emergencies_per_user,
        }
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            send_timeout_secs: self.send_timeout_secs,
            deep_link_base: self.deep_link_base.clone(),
        }
    }

    /// HTTP gateway settings for `channel`, if a URL is configured.
    pub fn provider(&self, channel: Channel) -> Option<HttpProviderConfig> {
        let url = match channel {
            Channel::Push => self.push_provider_url.as_ref(),
            Channel::Sms => self.sms_provider_url.as_ref(),
            Channel::Email => self.email_provider_url.as_ref(),
        }?;
        Some(
            HttpProviderConfig::new(channel, url.clone())
                .with_auth_token(self.provider_auth_token.clone()),
        )
    }
}
