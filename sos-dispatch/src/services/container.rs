//! Service container.
//!
//! Builds every engine component from an [`EngineConfig`] and a pool, and
//! owns their lifecycle: recovery and worker start-up in [`ServiceContainer::start`],
//! orderly teardown in [`ServiceContainer::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::emergency_service::EmergencyService;
use super::events::{EmergencyEvent, EmergencyEventBroadcaster};
use crate::Result;
use crate::config::EngineConfig;
use crate::countdown::CountdownService;
use crate::database::repositories::{
    SqlxAcknowledgmentRepository, SqlxBatchRepository, SqlxEmergencyRepository,
    SqlxNotificationJobRepository,
};
use crate::domain::{Channel, Lane};
use crate::escalation::{
    EscalationEvent, EscalationEventBroadcaster, EscalationMonitor, TimerRegistry,
};
use crate::notification::channels::{HttpProviderSender, LogSender};
use crate::notification::{
    ContactDirectory, DispatchWorkerPool, DispatcherStats, InMemoryContactDirectory,
    NotificationDispatcher, NotificationQueue, RetryPolicyResolver, SenderRegistry,
};

/// Default shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all engine components.
pub struct ServiceContainer {
    pub pool: SqlitePool,
    pub emergency_service: Arc<EmergencyService>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub escalation: Arc<EscalationMonitor>,
    pub countdowns: Arc<CountdownService>,
    expedited_pool: DispatchWorkerPool,
    standard_pool: DispatchWorkerPool,
    countdown_rx: parking_lot::Mutex<Option<mpsc::Receiver<String>>>,
    countdown_listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Build the container with the senders and contact directory the
    /// configuration describes.
    pub async fn from_config(pool: SqlitePool, config: &EngineConfig) -> Result<Self> {
        let contacts: Arc<dyn ContactDirectory> = match &config.contacts_file {
            Some(path) => {
                let directory = InMemoryContactDirectory::from_json_file(path).await?;
                info!(
                    path = %path.display(),
                    users = directory.user_count(),
                    "Loaded emergency contacts"
                );
                Arc::new(directory)
            }
            None => {
                warn!("CONTACTS_FILE not set, no contacts will be notified");
                Arc::new(InMemoryContactDirectory::new())
            }
        };

        Ok(Self::with_components(
            pool,
            config,
            default_senders(config),
            contacts,
        ))
    }

    /// Build the container around caller-provided senders and contacts.
    pub fn with_components(
        pool: SqlitePool,
        config: &EngineConfig,
        senders: SenderRegistry,
        contacts: Arc<dyn ContactDirectory>,
    ) -> Self {
        let emergencies = Arc::new(SqlxEmergencyRepository::new(pool.clone()));
        let acknowledgments = Arc::new(SqlxAcknowledgmentRepository::new(pool.clone()));
        let jobs = Arc::new(SqlxNotificationJobRepository::new(pool.clone()));
        let batches = Arc::new(SqlxBatchRepository::new(pool.clone()));

        let queue = Arc::new(NotificationQueue::new(jobs));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            queue,
            batches,
            emergencies.clone(),
            contacts,
            senders,
            RetryPolicyResolver::new(config.retry.clone()),
            config.dispatcher(),
        ));

        let escalation = Arc::new(EscalationMonitor::new(
            Arc::new(TimerRegistry::new()),
            emergencies.clone(),
            acknowledgments.clone(),
            EscalationEventBroadcaster::new(),
            config.escalation_timeout(),
        ));

        let (countdowns, countdown_rx) = CountdownService::new();
        let countdowns = Arc::new(countdowns);

        let emergency_service = Arc::new(EmergencyService::new(
            emergencies,
            acknowledgments,
            dispatcher.clone(),
            escalation.clone(),
            countdowns.clone(),
            EmergencyEventBroadcaster::new(),
            config.emergency_service(),
        ));

        Self {
            pool,
            emergency_service,
            dispatcher,
            escalation,
            countdowns,
            expedited_pool: DispatchWorkerPool::new(Lane::Expedited, config.expedited_pool.clone()),
            standard_pool: DispatchWorkerPool::new(Lane::Standard, config.standard_pool.clone()),
            countdown_rx: parking_lot::Mutex::new(Some(countdown_rx)),
            countdown_listener: parking_lot::Mutex::new(None),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Recover interrupted jobs, then start the workers and the countdown listener.
    pub async fn start(&self) -> Result<()> {
        info!("Starting services");

        let recovered = self.dispatcher.queue().recover_interrupted().await?;
        if recovered > 0 {
            info!("Requeued {} interrupted notification jobs", recovered);
        }

        self.expedited_pool.start(self.dispatcher.clone());
        self.standard_pool.start(self.dispatcher.clone());

        if let Some(rx) = self.countdown_rx.lock().take() {
            let handle = self
                .emergency_service
                .spawn_countdown_listener(rx, self.cancellation_token.child_token());
            *self.countdown_listener.lock() = Some(handle);
        }

        info!("Services started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop timers, drain the workers and close the pool. Workers still busy
    /// after `timeout` are abandoned; their jobs are recovered on next start.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();

        let countdowns = self.countdowns.cleanup();
        let timers = self.escalation.cleanup();
        info!(
            countdowns,
            escalation_timers = timers,
            "Cancelled outstanding timers"
        );

        self.dispatcher.queue().shutdown();

        let drained = tokio::time::timeout(timeout, async {
            tokio::join!(self.expedited_pool.stop(), self.standard_pool.stop());
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        if let Some(handle) = self.countdown_listener.lock().take() {
            handle.abort();
        }

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn subscribe_emergency_events(&self) -> tokio::sync::broadcast::Receiver<EmergencyEvent> {
        self.emergency_service.subscribe()
    }

    pub fn subscribe_escalation_events(&self) -> tokio::sync::broadcast::Receiver<EscalationEvent> {
        self.escalation.subscribe()
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            dispatcher: self.dispatcher.stats(),
            active_countdowns: self.countdowns.active_timers(),
            monitored_emergencies: self.escalation.get_active_monitoring(),
            busy_expedited_workers: self.expedited_pool.active_count(),
            busy_standard_workers: self.standard_pool.active_count(),
        }
    }
}

/// HTTP gateway sender for every channel with a provider URL, dry-run
/// logging sender for the rest.
pub fn default_senders(config: &EngineConfig) -> SenderRegistry {
    Channel::ALL
        .into_iter()
        .fold(SenderRegistry::new(), |registry, channel| match config.provider(channel) {
            Some(provider) => {
                info!(%channel, url = %provider.url, "Using HTTP provider sender");
                registry.register(Arc::new(HttpProviderSender::new(provider)))
            }
            None => {
                warn!(%channel, "No provider configured, messages will only be logged");
                registry.register(Arc::new(LogSender::new(channel)))
            }
        })
}

/// Service statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub dispatcher: DispatcherStats,
    pub active_countdowns: usize,
    pub monitored_emergencies: usize,
    pub busy_expedited_workers: usize,
    pub busy_standard_workers: usize,
}
