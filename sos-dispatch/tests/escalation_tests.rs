//! Escalation monitor against the SQLite ledger, with a short timeout.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{DispatchHarness, wait_until};
use sos_dispatch::database::repositories::{AcknowledgmentRepository, EmergencyRepository};
use sos_dispatch::domain::{Acknowledgment, EmergencyType};
use sos_dispatch::escalation::{
    EscalationEventBroadcaster, EscalationMonitor, EscalationReason, TimerRegistry,
};
use sos_dispatch::notification::SenderRegistry;
use tokio::sync::broadcast::error::TryRecvError;

const TIMEOUT: Duration = Duration::from_millis(200);

async fn setup() -> (DispatchHarness, Arc<EscalationMonitor>) {
    let harness = DispatchHarness::new(SenderRegistry::new()).await;
    let monitor = Arc::new(EscalationMonitor::new(
        Arc::new(TimerRegistry::new()),
        harness.emergencies.clone(),
        harness.acknowledgments.clone(),
        EscalationEventBroadcaster::new(),
        TIMEOUT,
    ));
    (harness, monitor)
}

#[tokio::test]
async fn unacknowledged_emergency_escalates_once() {
    let (harness, monitor) = setup().await;
    let emergency = harness
        .active_emergency("user-1", EmergencyType::Medical)
        .await;
    let mut events = monitor.subscribe();

    assert!(monitor.start_monitoring(&emergency.id));
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(event.emergency_id, emergency.id);
    assert_eq!(event.reason, EscalationReason::NoAcknowledgment);
    assert!(!monitor.is_monitoring(&emergency.id));
    assert_eq!(monitor.get_active_monitoring(), 0);

    tokio::time::sleep(TIMEOUT * 2).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn acknowledged_emergency_does_not_escalate() {
    let (harness, monitor) = setup().await;
    let emergency = harness
        .active_emergency("user-1", EmergencyType::Fire)
        .await;
    let mut events = monitor.subscribe();

    monitor.start_monitoring(&emergency.id);
    harness
        .acknowledgments
        .record(&Acknowledgment::new(&emergency.id, "c1", "Alex").with_phone("+15550100"))
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || async {
            !monitor.is_monitoring(&emergency.id)
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn emergency_resolved_before_expiry_does_not_escalate() {
    let (harness, monitor) = setup().await;
    let emergency = harness
        .active_emergency("user-1", EmergencyType::Police)
        .await;
    let mut events = monitor.subscribe();

    monitor.start_monitoring(&emergency.id);
    harness
        .emergencies
        .resolve(&emergency.id, "Handled by neighbours")
        .await
        .unwrap();

    tokio::time::sleep(TIMEOUT * 3).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert!(!monitor.is_monitoring(&emergency.id));
}

#[tokio::test]
async fn stopped_timer_never_fires_and_can_restart() {
    let (harness, monitor) = setup().await;
    let emergency = harness
        .active_emergency("user-1", EmergencyType::General)
        .await;
    let mut events = monitor.subscribe();

    assert!(monitor.start_monitoring(&emergency.id));
    assert!(!monitor.start_monitoring(&emergency.id));
    assert!(monitor.stop_monitoring(&emergency.id));
    assert!(!monitor.stop_monitoring(&emergency.id));

    tokio::time::sleep(TIMEOUT * 2).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    assert!(monitor.start_monitoring(&emergency.id));
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.emergency_id, emergency.id);
}

#[tokio::test]
async fn cleanup_cancels_everything() {
    let (harness, monitor) = setup().await;
    let mut events = monitor.subscribe();

    for user in ["user-1", "user-2", "user-3"] {
        let emergency = harness
            .active_emergency(user, EmergencyType::Medical)
            .await;
        monitor.start_monitoring(&emergency.id);
    }
    assert_eq!(monitor.get_active_monitoring(), 3);

    assert_eq!(monitor.cleanup(), 3);
    assert_eq!(monitor.get_active_monitoring(), 0);

    tokio::time::sleep(TIMEOUT * 2).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}
