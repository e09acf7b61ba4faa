//! Escalation monitor.
//!
//! One lightweight task per monitored emergency sleeps until the escalation
//! timeout. On expiry it removes its own registry entry, re-reads the
//! emergency and counts acknowledgments; only an ACTIVE emergency with zero
//! acknowledgments is escalated. Stopping cancels the task's token, which is
//! safe at any point, including while the timer is firing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::events::{EscalationEvent, EscalationEventBroadcaster};
use super::registry::TimerRegistry;
use crate::Result;
use crate::database::repositories::{AcknowledgmentRepository, EmergencyRepository};
use crate::domain::EmergencyStatus;

/// Result of one escalation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationCheck {
    /// No acknowledgment, escalation event emitted.
    Escalated,
    /// At least one contact acknowledged.
    Acknowledged { count: i64 },
    /// The emergency left the ACTIVE state.
    NotEscalatable { status: EmergencyStatus },
}

/// The escalation monitor.
pub struct EscalationMonitor {
    registry: Arc<TimerRegistry>,
    emergencies: Arc<dyn EmergencyRepository>,
    acknowledgments: Arc<dyn AcknowledgmentRepository>,
    events: EscalationEventBroadcaster,
    timeout: Duration,
}

impl EscalationMonitor {
    pub fn new(
        registry: Arc<TimerRegistry>,
        emergencies: Arc<dyn EmergencyRepository>,
        acknowledgments: Arc<dyn AcknowledgmentRepository>,
        events: EscalationEventBroadcaster,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            emergencies,
            acknowledgments,
            events,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start the escalation timer for an emergency.
    ///
    /// Returns false, leaving the running timer untouched, if the emergency
    /// is already monitored.
    pub fn start_monitoring(self: &Arc<Self>, emergency_id: &str) -> bool {
        let now = Utc::now();
        let deadline = chrono::Duration::from_std(self.timeout)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(now);
        let Some(handle) = self.registry.try_register(emergency_id, deadline) else {
            warn!(emergency_id, "Escalation monitoring already active");
            return false;
        };

        info!(
            emergency_id,
            timeout_secs = self.timeout.as_secs(),
            "Started escalation monitoring"
        );

        let monitor = Arc::clone(self);
        let emergency_id = emergency_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = handle.token.cancelled() => return,
                _ = tokio::time::sleep(monitor.timeout) => {}
            }

            if !monitor
                .registry
                .remove_fired(&emergency_id, handle.generation)
            {
                debug!(emergency_id = %emergency_id, "Escalation timer stopped before firing");
                return;
            }

            match monitor.check_escalation(&emergency_id).await {
                Ok(outcome) => {
                    debug!(emergency_id = %emergency_id, ?outcome, "Escalation check finished")
                }
                Err(e) => error!(
                    emergency_id = %emergency_id,
                    error = %e,
                    "Escalation check failed, abandoning this cycle"
                ),
            }
        });

        true
    }

    /// Stop monitoring an emergency. Returns false if it was not monitored.
    pub fn stop_monitoring(&self, emergency_id: &str) -> bool {
        let stopped = self.registry.cancel(emergency_id);
        if stopped {
            info!(emergency_id, "Stopped escalation monitoring");
        }
        stopped
    }

    /// Number of emergencies with a pending escalation timer.
    pub fn get_active_monitoring(&self) -> usize {
        self.registry.len()
    }

    pub fn is_monitoring(&self, emergency_id: &str) -> bool {
        self.registry.contains(emergency_id)
    }

    pub fn monitored_emergencies(&self) -> Vec<String> {
        self.registry.emergency_ids()
    }

    /// Cancel every timer without running its check.
    pub fn cleanup(&self) -> usize {
        let cancelled = self.registry.cancel_all();
        info!(cancelled, "Escalation monitor cleaned up");
        cancelled
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscalationEvent> {
        self.events.subscribe()
    }

    /// Decide whether an emergency escalates and emit the event if so.
    pub async fn check_escalation(&self, emergency_id: &str) -> Result<EscalationCheck> {
        let emergency = self.emergencies.get_by_id(emergency_id).await?;
        if !emergency.status.is_escalatable() {
            debug!(
                emergency_id,
                status = %emergency.status,
                "Emergency no longer escalatable"
            );
            return Ok(EscalationCheck::NotEscalatable {
                status: emergency.status,
            });
        }

        let count = self.acknowledgments.count(emergency_id).await?;
        if count > 0 {
            info!(emergency_id, count, "Emergency acknowledged, no escalation");
            return Ok(EscalationCheck::Acknowledged { count });
        }

        warn!(emergency_id, "No acknowledgment received, escalating");
        self.events
            .publish(EscalationEvent::no_acknowledgment(emergency_id));
        Ok(EscalationCheck::Escalated)
    }
}
