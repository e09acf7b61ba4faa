//! Emergency lifecycle through the service container: countdowns,
//! activation side effects, terminal transitions and acknowledgments.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{ScriptedSender, contact, setup_pool, start_engine, test_engine_config, wait_until};
use sos_dispatch::database::repositories::{
    BatchRepository, NotificationJobRepository, SqlxBatchRepository, SqlxNotificationJobRepository,
};
use sos_dispatch::domain::{
    Acknowledgment, Channel, ContactInfo, EmergencyStatus, EmergencyType, HistoryFilters, Location,
};
use sos_dispatch::notification::{
    ContactDirectory, EmergencyContact, InMemoryContactDirectory, JobStatus, SenderRegistry,
};
use sos_dispatch::services::{EmergencyEvent, ServiceContainer, TriggerRequest};
use sos_dispatch::{Error, Result};

fn request(user_id: &str) -> TriggerRequest {
    TriggerRequest::new(user_id, EmergencyType::Medical, Location::new(51.5074, -0.1278))
        .with_message("Chest pain")
}

fn two_contacts() -> Arc<InMemoryContactDirectory> {
    let contacts = Arc::new(InMemoryContactDirectory::new());
    contacts.set_display_name("user-1", "Dana");
    contacts.set_contacts(
        "user-1",
        vec![
            contact("c1", "Alex", ContactInfo::default().with_push_token("tok-1")),
            contact("c2", "Blair", ContactInfo::default().with_phone("+15550100")),
        ],
    );
    contacts
}

#[tokio::test]
async fn zero_countdown_activates_and_notifies_contacts() {
    let push = ScriptedSender::always_ok(Channel::Push);
    let sms = ScriptedSender::always_ok(Channel::Sms);
    let (_dir, engine) = start_engine(
        SenderRegistry::new()
            .register(push.clone())
            .register(sms.clone()),
        two_contacts(),
    )
    .await;
    let mut events = engine.subscribe_emergency_events();

    let emergency = engine
        .emergency_service
        .trigger(request("user-1"))
        .await
        .unwrap();

    assert_eq!(emergency.status, EmergencyStatus::Active);
    assert!(emergency.activated_at.is_some());
    assert!(engine.escalation.is_monitoring(&emergency.id));
    assert!(!engine.countdowns.is_timer_active(&emergency.id));

    assert!(matches!(
        events.recv().await.unwrap(),
        EmergencyEvent::Triggered { .. }
    ));
    match events.recv().await.unwrap() {
        EmergencyEvent::Activated {
            notified_contacts, ..
        } => assert_eq!(notified_contacts, 2),
        other => panic!("unexpected event {:?}", other),
    }

    assert!(
        wait_until(Duration::from_secs(5), || async {
            push.calls() == 1 && sms.calls() == 1
        })
        .await
    );

    let batches = SqlxBatchRepository::new(engine.pool.clone());
    assert!(
        wait_until(Duration::from_secs(5), || async {
            let batches = batches.list_for_emergency(&emergency.id).await.unwrap();
            batches.len() == 1 && batches[0].sent == 2 && batches[0].pending == 0
        })
        .await
    );

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn countdown_elapsing_activates_pending_emergency() {
    let (_dir, engine) = start_engine(SenderRegistry::new(), two_contacts()).await;

    let emergency = engine
        .emergency_service
        .trigger(request("user-1").with_countdown(1))
        .await
        .unwrap();
    assert_eq!(emergency.status, EmergencyStatus::Pending);
    assert!(engine.countdowns.is_timer_active(&emergency.id));
    assert!(!engine.escalation.is_monitoring(&emergency.id));

    let service = engine.emergency_service.clone();
    let id = emergency.id.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let service = service.clone();
            let id = id.clone();
            async move {
                service
                    .get_with_acknowledgments(&id)
                    .await
                    .map(|d| d.emergency.status == EmergencyStatus::Active)
                    .unwrap_or(false)
            }
        })
        .await
    );
    assert!(engine.escalation.is_monitoring(&emergency.id));
    assert!(!engine.countdowns.is_timer_active(&emergency.id));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancel_during_countdown_never_notifies() {
    let push = ScriptedSender::always_ok(Channel::Push);
    let (_dir, engine) =
        start_engine(SenderRegistry::new().register(push.clone()), two_contacts()).await;
    let mut events = engine.subscribe_emergency_events();

    let emergency = engine
        .emergency_service
        .trigger(request("user-1").with_countdown(60))
        .await
        .unwrap();
    let cancelled = engine
        .emergency_service
        .cancel(&emergency.id, Some("false alarm".to_string()))
        .await
        .unwrap();

    assert_eq!(cancelled.status, EmergencyStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert!(!engine.countdowns.is_timer_active(&emergency.id));
    assert!(!engine.escalation.is_monitoring(&emergency.id));

    let _triggered = events.recv().await.unwrap();
    match events.recv().await.unwrap() {
        EmergencyEvent::Cancelled { reason, .. } => {
            assert_eq!(reason.as_deref(), Some("false alarm"))
        }
        other => panic!("unexpected event {:?}", other),
    }

    // A second cancel is an invalid transition and changes nothing.
    let err = engine
        .emergency_service
        .cancel(&emergency.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(push.calls(), 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn one_open_emergency_per_user() {
    let (_dir, engine) = start_engine(SenderRegistry::new(), two_contacts()).await;
    let service = &engine.emergency_service;

    let first = service.trigger(request("user-1")).await.unwrap();
    let err = service.trigger(request("user-1")).await.unwrap_err();
    assert!(matches!(err, Error::EmergencyAlreadyActive { .. }));

    // Other users are unaffected.
    service.trigger(request("user-2")).await.unwrap();

    let resolved = service
        .resolve(&first.id, "Paramedics arrived")
        .await
        .unwrap();
    assert_eq!(resolved.status, EmergencyStatus::Resolved);
    assert_eq!(
        resolved.resolution_notes.as_deref(),
        Some("Paramedics arrived")
    );
    assert!(!engine.escalation.is_monitoring(&first.id));

    let again = service.trigger(request("user-1")).await.unwrap();
    assert_ne!(again.id, first.id);
    assert_eq!(
        service.get_active_for_user("user-1").await.unwrap().map(|e| e.id),
        Some(again.id)
    );

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn resolve_requires_active_emergency_and_notes() {
    let (_dir, engine) = start_engine(SenderRegistry::new(), two_contacts()).await;
    let service = &engine.emergency_service;

    let pending = service
        .trigger(request("user-1").with_countdown(60))
        .await
        .unwrap();
    let err = service.resolve(&pending.id, "done").await.unwrap_err();
    assert!(err.is_validation());

    let active = service.activate(&pending.id).await.unwrap();
    assert!(service.resolve(&active.id, "   ").await.is_err());
    let details = service.get_with_acknowledgments(&active.id).await.unwrap();
    assert_eq!(details.emergency.status, EmergencyStatus::Active);

    let mut events = service.subscribe();
    service.resolve(&active.id, "All good").await.unwrap();
    match events.recv().await.unwrap() {
        EmergencyEvent::Resolved {
            duration_seconds, ..
        } => assert!(duration_seconds.is_some()),
        other => panic!("unexpected event {:?}", other),
    }

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn acknowledgments_are_unique_per_contact() {
    let (_dir, engine) = start_engine(SenderRegistry::new(), two_contacts()).await;
    let service = &engine.emergency_service;

    let pending = service
        .trigger(request("user-1").with_countdown(60))
        .await
        .unwrap();
    let err = service
        .acknowledge(Acknowledgment::new(&pending.id, "c1", "Alex").with_phone("+15550101"))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    service.activate(&pending.id).await.unwrap();
    let mut events = service.subscribe();

    service
        .acknowledge(
            Acknowledgment::new(&pending.id, "c1", "Alex")
                .with_phone("+15550101")
                .with_message("On my way"),
        )
        .await
        .unwrap();
    match events.recv().await.unwrap() {
        EmergencyEvent::ContactAcknowledged { contact_id, .. } => assert_eq!(contact_id, "c1"),
        other => panic!("unexpected event {:?}", other),
    }

    let err = service
        .acknowledge(Acknowledgment::new(&pending.id, "c1", "Alex").with_phone("+15550101"))
        .await
        .unwrap_err();
    assert!(err.is_duplicate());

    service
        .acknowledge(Acknowledgment::new(&pending.id, "c2", "Blair").with_email("b@example.com"))
        .await
        .unwrap();

    let details = service.get_with_acknowledgments(&pending.id).await.unwrap();
    let contacts: Vec<_> = details
        .acknowledgments
        .iter()
        .map(|a| a.contact_id.as_str())
        .collect();
    assert_eq!(contacts, vec!["c1", "c2"]);
    assert_eq!(
        details.acknowledgments[0].message.as_deref(),
        Some("On my way")
    );

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn auto_trigger_uses_device_countdown() {
    let (_dir, engine) = start_engine(SenderRegistry::new(), two_contacts()).await;

    let emergency = engine
        .emergency_service
        .auto_trigger(
            "watch-7",
            TriggerRequest::new(
                "user-1",
                EmergencyType::FallDetected,
                Location::new(48.8566, 2.3522),
            ),
        )
        .await
        .unwrap();

    assert_eq!(emergency.status, EmergencyStatus::Pending);
    assert!(emergency.auto_triggered);
    assert_eq!(emergency.triggered_by, "device:watch-7");
    assert_eq!(emergency.countdown_seconds, 30);
    assert!(engine.countdowns.is_timer_active(&emergency.id));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn history_is_paginated_newest_first() {
    let (_dir, engine) = start_engine(SenderRegistry::new(), two_contacts()).await;
    let service = &engine.emergency_service;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let emergency = service
            .trigger(request("user-1").with_countdown(60))
            .await
            .unwrap();
        service.cancel(&emergency.id, None).await.unwrap();
        ids.push(emergency.id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let page = service
        .history(HistoryFilters::for_user("user-1").with_page(1, 2))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.emergencies.len(), 2);
    assert_eq!(page.emergencies[0].id, ids[2]);

    let page = service
        .history(HistoryFilters::for_user("user-1").with_page(2, 2))
        .await
        .unwrap();
    assert_eq!(page.emergencies.len(), 1);
    assert_eq!(page.emergencies[0].id, ids[0]);

    let none = service
        .history(HistoryFilters::for_user("user-1").with_status(EmergencyStatus::Active))
        .await
        .unwrap();
    assert_eq!(none.total, 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_clears_every_timer() {
    let (_dir, engine) = start_engine(SenderRegistry::new(), two_contacts()).await;
    let service = &engine.emergency_service;

    service
        .trigger(request("user-1").with_countdown(60))
        .await
        .unwrap();
    service.trigger(request("user-2")).await.unwrap();
    assert_eq!(engine.countdowns.active_timers(), 1);
    assert_eq!(engine.escalation.get_active_monitoring(), 1);

    engine
        .shutdown_with_timeout(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(engine.countdowns.active_timers(), 0);
    assert_eq!(engine.escalation.get_active_monitoring(), 0);
    assert!(engine.is_shutting_down());
    assert!(engine.pool.is_closed());
}

/// Directory that answers contact lookups only after a delay.
struct SlowDirectory {
    inner: Arc<InMemoryContactDirectory>,
    delay: Duration,
}

#[async_trait]
impl ContactDirectory for SlowDirectory {
    async fn emergency_contacts(&self, user_id: &str) -> Result<Vec<EmergencyContact>> {
        tokio::time::sleep(self.delay).await;
        self.inner.emergency_contacts(user_id).await
    }

    async fn display_name(&self, user_id: &str) -> Result<Option<String>> {
        self.inner.display_name(user_id).await
    }
}

#[tokio::test]
async fn cancel_during_activation_fan_out_sends_nothing() {
    let push = ScriptedSender::always_ok(Channel::Push);
    let sms = ScriptedSender::always_ok(Channel::Sms);
    let (_dir, pool) = setup_pool().await;
    let engine = ServiceContainer::with_components(
        pool,
        &test_engine_config(),
        SenderRegistry::new()
            .register(push.clone())
            .register(sms.clone()),
        Arc::new(SlowDirectory {
            inner: two_contacts(),
            delay: Duration::from_millis(300),
        }),
    );
    engine.start().await.unwrap();
    let mut events = engine.subscribe_emergency_events();

    let service = engine.emergency_service.clone();
    let activation = tokio::spawn(async move { service.trigger(request("user-1")).await });

    // Activation has committed and is now loading contacts.
    assert!(
        wait_until(Duration::from_secs(2), || async {
            matches!(
                engine.emergency_service.get_active_for_user("user-1").await,
                Ok(Some(e)) if e.is_active()
            )
        })
        .await
    );
    let emergency = engine
        .emergency_service
        .get_active_for_user("user-1")
        .await
        .unwrap()
        .unwrap();
    engine
        .emergency_service
        .cancel(&emergency.id, Some("false alarm".into()))
        .await
        .unwrap();

    let activated = activation.await.unwrap().unwrap();
    assert_eq!(activated.status, EmergencyStatus::Cancelled);
    assert!(!engine.escalation.is_monitoring(&emergency.id));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(push.calls(), 0);
    assert_eq!(sms.calls(), 0);

    let jobs = SqlxNotificationJobRepository::new(engine.pool.clone())
        .list_for_emergency(&emergency.id)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Cancelled));
    let batches = SqlxBatchRepository::new(engine.pool.clone())
        .list_for_emergency(&emergency.id)
        .await
        .unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].pending, 0);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(!seen.iter().any(|e| matches!(e, EmergencyEvent::Activated { .. })));
    assert!(seen.iter().any(|e| matches!(e, EmergencyEvent::Cancelled { .. })));

    engine.shutdown().await.unwrap();
}
