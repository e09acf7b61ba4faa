//! Emergency orchestration.
//!
//! Owns the side effects of every lifecycle transition: entering ACTIVE
//! starts escalation monitoring and the notification fan-out, entering
//! CANCELLED or RESOLVED stops both. The state change is always committed
//! first; side effects only follow a successful transition.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::events::{EmergencyEvent, EmergencyEventBroadcaster};
use crate::countdown::CountdownService;
use crate::database::repositories::{AcknowledgmentRepository, EmergencyRepository};
use crate::domain::{
    Acknowledgment, Emergency, EmergencyStatus, EmergencyType, HistoryFilters, Location,
};
use crate::escalation::EscalationMonitor;
use crate::notification::NotificationDispatcher;
use crate::{Error, Result};

/// Emergency service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyServiceConfig {
    /// Countdown before a user-triggered emergency activates.
    pub countdown_seconds: u64,
    /// Countdown before a device-triggered emergency activates.
    pub auto_trigger_countdown_seconds: u64,
    /// Open (PENDING or ACTIVE) emergencies allowed per user.
    pub max_emergencies_per_user: i64,
}

impl Default for EmergencyServiceConfig {
    fn default() -> Self {
        Self {
            countdown_seconds: 10,
            auto_trigger_countdown_seconds: 30,
            max_emergencies_per_user: 1,
        }
    }
}

/// Request to trigger an emergency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub user_id: String,
    pub emergency_type: EmergencyType,
    pub location: Location,
    #[serde(default)]
    pub message: Option<String>,
    /// Overrides the configured countdown.
    #[serde(default)]
    pub countdown_seconds: Option<u64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl TriggerRequest {
    pub fn new(user_id: impl Into<String>, emergency_type: EmergencyType, location: Location) -> Self {
        Self {
            user_id: user_id.into(),
            emergency_type,
            location,
            message: None,
            countdown_seconds: None,
            metadata: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_countdown(mut self, seconds: u64) -> Self {
        self.countdown_seconds = Some(seconds);
        self
    }
}

/// An emergency with its acknowledgment timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyDetails {
    pub emergency: Emergency,
    /// Oldest first.
    pub acknowledgments: Vec<Acknowledgment>,
}

/// One page of a user's emergency history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyHistoryPage {
    pub emergencies: Vec<Emergency>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// The emergency service.
pub struct EmergencyService {
    emergencies: Arc<dyn EmergencyRepository>,
    acknowledgments: Arc<dyn AcknowledgmentRepository>,
    dispatcher: Arc<NotificationDispatcher>,
    escalation: Arc<EscalationMonitor>,
    countdowns: Arc<CountdownService>,
    events: EmergencyEventBroadcaster,
    config: EmergencyServiceConfig,
}

impl EmergencyService {
    pub fn new(
        emergencies: Arc<dyn EmergencyRepository>,
        acknowledgments: Arc<dyn AcknowledgmentRepository>,
        dispatcher: Arc<NotificationDispatcher>,
        escalation: Arc<EscalationMonitor>,
        countdowns: Arc<CountdownService>,
        events: EmergencyEventBroadcaster,
        config: EmergencyServiceConfig,
    ) -> Self {
        Self {
            emergencies,
            acknowledgments,
            dispatcher,
            escalation,
            countdowns,
            events,
            config,
        }
    }

    /// Create a PENDING emergency for a user and start its countdown. A zero
    /// countdown activates it immediately.
    pub async fn trigger(&self, request: TriggerRequest) -> Result<Emergency> {
        let countdown = request
            .countdown_seconds
            .unwrap_or(self.config.countdown_seconds);
        self.create_emergency(request, "user".to_string(), false, countdown)
            .await
    }

    /// Trigger on behalf of a device (fall detection, panic button).
    pub async fn auto_trigger(
        &self,
        device_id: &str,
        request: TriggerRequest,
    ) -> Result<Emergency> {
        let countdown = request
            .countdown_seconds
            .unwrap_or(self.config.auto_trigger_countdown_seconds);
        self.create_emergency(request, format!("device:{}", device_id), true, countdown)
            .await
    }

    async fn create_emergency(
        &self,
        request: TriggerRequest,
        triggered_by: String,
        auto_triggered: bool,
        countdown: u64,
    ) -> Result<Emergency> {
        let open = self
            .emergencies
            .count_active_by_user_id(&request.user_id)
            .await?;
        if open >= self.config.max_emergencies_per_user {
            return Err(Error::EmergencyAlreadyActive {
                user_id: request.user_id,
            });
        }

        let countdown_seconds = i64::try_from(countdown)
            .map_err(|_| Error::validation("countdown_seconds is out of range"))?;
        let mut emergency = Emergency::new(
            request.user_id,
            request.emergency_type,
            request.location,
            countdown_seconds,
        )
        .with_trigger(triggered_by, auto_triggered);
        if let Some(message) = request.message {
            emergency = emergency.with_message(message);
        }
        if let Some(metadata) = request.metadata {
            emergency = emergency.with_metadata(metadata);
        }
        emergency.validate()?;

        self.emergencies.create(&emergency).await?;
        info!(
            emergency_id = %emergency.id,
            user_id = %emergency.user_id,
            emergency_type = %emergency.emergency_type,
            countdown_seconds,
            auto_triggered,
            "Emergency triggered"
        );
        self.events.publish(EmergencyEvent::Triggered {
            emergency_id: emergency.id.clone(),
            user_id: emergency.user_id.clone(),
            emergency_type: emergency.emergency_type,
            countdown_seconds,
            auto_triggered,
            timestamp: Utc::now(),
        });

        if countdown == 0 {
            return self.activate(&emergency.id).await;
        }
        self.countdowns.start_countdown(&emergency.id, countdown);
        Ok(emergency)
    }

    /// PENDING -> ACTIVE. Starts escalation monitoring, then fans out
    /// notifications to the user's contacts.
    ///
    /// A cancel or resolve that commits while the fan-out is running wins:
    /// the monitoring and jobs started here are undone and the terminal
    /// emergency is returned.
    pub async fn activate(&self, emergency_id: &str) -> Result<Emergency> {
        let emergency = self
            .emergencies
            .update_status(emergency_id, EmergencyStatus::Active)
            .await?;
        self.countdowns.cancel_countdown(emergency_id);
        info!(emergency_id, "Emergency activated");

        let monitoring = self.escalation.start_monitoring(emergency_id);
        let dispatched = self.dispatcher.dispatch_emergency(&emergency).await;

        // The terminal transition's stand-down ran before these side effects existed.
        let current = self.emergencies.get_by_id(emergency_id).await?;
        if !current.is_active() {
            info!(
                emergency_id,
                status = %current.status,
                "Emergency ended during activation, standing down"
            );
            if monitoring {
                self.escalation.stop_monitoring(emergency_id);
            }
            if let Err(e) = self.dispatcher.cancel_for_emergency(emergency_id).await {
                error!(emergency_id, error = %e, "Failed to cancel queued notifications");
            }
            return Ok(current);
        }
        let summary = dispatched?;

        self.events.publish(EmergencyEvent::Activated {
            emergency_id: emergency.id.clone(),
            user_id: emergency.user_id.clone(),
            notified_contacts: summary.jobs.len(),
            timestamp: Utc::now(),
        });
        Ok(emergency)
    }

    /// PENDING or ACTIVE -> CANCELLED.
    pub async fn cancel(&self, emergency_id: &str, reason: Option<String>) -> Result<Emergency> {
        let emergency = self
            .emergencies
            .update_status(emergency_id, EmergencyStatus::Cancelled)
            .await?;
        self.stand_down(emergency_id).await;
        info!(emergency_id, reason = ?reason, "Emergency cancelled");

        self.events.publish(EmergencyEvent::Cancelled {
            emergency_id: emergency.id.clone(),
            user_id: emergency.user_id.clone(),
            reason,
            timestamp: Utc::now(),
        });
        Ok(emergency)
    }

    /// ACTIVE -> RESOLVED with required notes.
    pub async fn resolve(&self, emergency_id: &str, notes: &str) -> Result<Emergency> {
        let emergency = self.emergencies.resolve(emergency_id, notes).await?;
        self.stand_down(emergency_id).await;

        let duration_seconds = emergency.duration().map(|d| d.num_seconds());
        info!(emergency_id, duration_seconds, "Emergency resolved");

        self.events.publish(EmergencyEvent::Resolved {
            emergency_id: emergency.id.clone(),
            user_id: emergency.user_id.clone(),
            duration_seconds,
            timestamp: Utc::now(),
        });
        Ok(emergency)
    }

    /// Stop timers and queued notifications of an emergency that just became terminal.
    async fn stand_down(&self, emergency_id: &str) {
        self.countdowns.cancel_countdown(emergency_id);
        self.escalation.stop_monitoring(emergency_id);
        if let Err(e) = self.dispatcher.cancel_for_emergency(emergency_id).await {
            error!(emergency_id, error = %e, "Failed to cancel queued notifications");
        }
    }

    /// Record a contact's acknowledgment of an ACTIVE emergency.
    pub async fn acknowledge(&self, acknowledgment: Acknowledgment) -> Result<Acknowledgment> {
        let emergency = self
            .emergencies
            .get_by_id(&acknowledgment.emergency_id)
            .await?;
        if !emergency.is_active() {
            return Err(Error::validation(format!(
                "emergency {} is {} and cannot be acknowledged",
                emergency.id, emergency.status
            )));
        }

        self.acknowledgments.record(&acknowledgment).await?;
        info!(
            emergency_id = %acknowledgment.emergency_id,
            contact_id = %acknowledgment.contact_id,
            "Contact acknowledged emergency"
        );

        self.events.publish(EmergencyEvent::ContactAcknowledged {
            emergency_id: acknowledgment.emergency_id.clone(),
            contact_id: acknowledgment.contact_id.clone(),
            contact_name: acknowledgment.contact_name.clone(),
            timestamp: acknowledgment.acknowledged_at,
        });
        Ok(acknowledgment)
    }

    pub async fn get_with_acknowledgments(&self, emergency_id: &str) -> Result<EmergencyDetails> {
        let emergency = self.emergencies.get_by_id(emergency_id).await?;
        let acknowledgments = self.acknowledgments.list(emergency_id).await?;
        Ok(EmergencyDetails {
            emergency,
            acknowledgments,
        })
    }

    pub async fn get_active_for_user(&self, user_id: &str) -> Result<Option<Emergency>> {
        self.emergencies.get_active_by_user_id(user_id).await
    }

    pub async fn history(&self, filters: HistoryFilters) -> Result<EmergencyHistoryPage> {
        let (emergencies, total) = self.emergencies.list_with_filters(&filters).await?;
        Ok(EmergencyHistoryPage {
            emergencies,
            total,
            page: filters.page,
            page_size: filters.page_size,
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EmergencyEvent> {
        self.events.subscribe()
    }

    /// Activate emergencies whose countdown elapsed, if still PENDING.
    pub fn spawn_countdown_listener(
        self: &Arc<Self>,
        mut elapsed_rx: mpsc::Receiver<String>,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Countdown listener shutting down");
                        break;
                    }
                    received = elapsed_rx.recv() => {
                        let Some(emergency_id) = received else { break };
                        service.on_countdown_elapsed(&emergency_id).await;
                    }
                }
            }
        })
    }

    async fn on_countdown_elapsed(&self, emergency_id: &str) {
        match self.emergencies.get_by_id(emergency_id).await {
            Ok(emergency) if emergency.is_pending() => {
                if let Err(e) = self.activate(emergency_id).await {
                    error!(emergency_id, error = %e, "Failed to activate emergency after countdown");
                }
            }
            Ok(emergency) => debug!(
                emergency_id,
                status = %emergency.status,
                "Countdown elapsed for non-pending emergency"
            ),
            Err(e) => error!(emergency_id, error = %e, "Failed to load emergency after countdown"),
        }
    }
}
