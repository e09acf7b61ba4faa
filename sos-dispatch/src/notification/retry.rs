//! Per-channel retry policy resolver.
//!
//! A pure decision: given the channel, how many attempts were made and how the
//! last one failed, either retry the same job after a delay or stop. Choosing a
//! different channel after a stop is the dispatcher's fallback step, not a
//! second retry loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::channels::ErrorClass;
use crate::domain::Channel;

/// Hard ceiling on any retry delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 45_000;

/// Delay growth between attempts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `base * 2^(attempt - 1)`
    Exponential,
    /// `base` between every attempt.
    Fixed,
}

/// Retry settings for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff: Backoff,
}

impl ChannelRetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            backoff: Backoff::Exponential,
        }
    }

    pub fn fixed(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            backoff: Backoff::Fixed,
        }
    }
}

/// Retry settings for every channel plus the shared delay cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicyTable {
    pub push: ChannelRetryPolicy,
    pub sms: ChannelRetryPolicy,
    pub email: ChannelRetryPolicy,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicyTable {
    fn default() -> Self {
        Self {
            push: ChannelRetryPolicy::exponential(3, 1_000),
            sms: ChannelRetryPolicy::fixed(2, 5_000),
            email: ChannelRetryPolicy::exponential(3, 2_000),
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicyTable {
    pub fn for_channel(&self, channel: Channel) -> &ChannelRetryPolicy {
        match channel {
            Channel::Push => &self.push,
            Channel::Sms => &self.sms,
            Channel::Email => &self.email,
        }
    }
}

/// Why a job will not be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    /// The failure cannot be fixed by retrying.
    Permanent,
    /// Max attempts reached on this channel.
    Exhausted,
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Stop { reason: StopReason },
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Resolves retry decisions from a [`RetryPolicyTable`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyResolver {
    table: RetryPolicyTable,
}

impl RetryPolicyResolver {
    pub fn new(table: RetryPolicyTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RetryPolicyTable {
        &self.table
    }

    pub fn max_attempts(&self, channel: Channel) -> u32 {
        self.table.for_channel(channel).max_attempts
    }

    /// False once `attempts_made` reaches the channel's max, and always false for
    /// a permanent failure. A missing classification counts as retryable.
    pub fn should_retry(
        &self,
        channel: Channel,
        attempts_made: u32,
        error_class: Option<ErrorClass>,
    ) -> bool {
        if error_class == Some(ErrorClass::Permanent) {
            return false;
        }
        attempts_made < self.max_attempts(channel)
    }

    /// Delay before the attempt following `attempts_made`.
    ///
    /// Non-decreasing in `attempts_made` and never above the table's cap.
    pub fn calculate_retry_delay(&self, channel: Channel, attempts_made: u32) -> Duration {
        let policy = self.table.for_channel(channel);
        let exponent = attempts_made.saturating_sub(1);

        let delay_ms = match policy.backoff {
            Backoff::Exponential => policy
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(exponent)),
            Backoff::Fixed => policy.base_delay_ms,
        };

        Duration::from_millis(delay_ms.min(self.table.max_delay_ms))
    }

    pub fn decide(
        &self,
        channel: Channel,
        attempts_made: u32,
        error_class: Option<ErrorClass>,
    ) -> RetryDecision {
        if error_class == Some(ErrorClass::Permanent) {
            return RetryDecision::Stop {
                reason: StopReason::Permanent,
            };
        }
        if !self.should_retry(channel, attempts_made, error_class) {
            return RetryDecision::Stop {
                reason: StopReason::Exhausted,
            };
        }
        RetryDecision::Retry {
            delay: self.calculate_retry_delay(channel, attempts_made),
        }
    }
}
