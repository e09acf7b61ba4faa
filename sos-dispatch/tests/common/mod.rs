#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use sos_dispatch::database::repositories::{
    EmergencyRepository, SqlxAcknowledgmentRepository, SqlxBatchRepository,
    SqlxEmergencyRepository, SqlxNotificationJobRepository,
};
use sos_dispatch::database::{DbPool, init_pool_with_size, run_migrations};
use sos_dispatch::domain::{
    Channel, ContactInfo, Emergency, EmergencyStatus, EmergencyType, Lane, Location,
};
use sos_dispatch::notification::retry::ChannelRetryPolicy;
use sos_dispatch::notification::{
    ChannelSender, DispatcherConfig, EmergencyContact, InMemoryContactDirectory, JobOutcome,
    NotificationDispatcher, NotificationJob, NotificationQueue, RenderedMessage,
    RetryPolicyResolver, RetryPolicyTable, SendResult, SenderRegistry,
};

/// File-backed database in a temp dir. Keep the `TempDir` alive for the test.
pub async fn setup_pool() -> (TempDir, DbPool) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
    let pool = init_pool_with_size(&url, 4).await.unwrap();
    run_migrations(&pool).await.unwrap();
    (dir, pool)
}

/// Same shape as the default table with millisecond delays.
pub fn fast_retry_table() -> RetryPolicyTable {
    RetryPolicyTable {
        push: ChannelRetryPolicy::exponential(3, 5),
        sms: ChannelRetryPolicy::fixed(2, 5),
        email: ChannelRetryPolicy::exponential(3, 5),
        max_delay_ms: 50,
    }
}

/// Sender replaying a script of results, then a fixed fallback result.
pub struct ScriptedSender {
    channel: Channel,
    script: Mutex<VecDeque<SendResult>>,
    otherwise: SendResult,
    calls: AtomicUsize,
    destinations: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedSender {
    pub fn always(channel: Channel, result: SendResult) -> Arc<Self> {
        Self::scripted(channel, Vec::new(), result)
    }

    pub fn always_ok(channel: Channel) -> Arc<Self> {
        Self::always(channel, SendResult::sent(Some(format!("{}-msg", channel))))
    }

    pub fn scripted(channel: Channel, script: Vec<SendResult>, otherwise: SendResult) -> Arc<Self> {
        Arc::new(Self {
            channel,
            script: Mutex::new(script.into()),
            otherwise,
            calls: AtomicUsize::new(0),
            destinations: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        })
    }

    /// Succeeds, but only after `delay`.
    pub fn slow(channel: Channel, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            channel,
            script: Mutex::new(VecDeque::new()),
            otherwise: SendResult::sent(Some(format!("{}-msg", channel))),
            calls: AtomicUsize::new(0),
            destinations: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn destinations(&self) -> Vec<String> {
        self.destinations.lock().clone()
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, job: &NotificationJob, _message: &RenderedMessage) -> SendResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(destination) = job.destination() {
            self.destinations.lock().push(destination.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.otherwise.clone())
    }
}

/// Dispatcher over real SQLite repositories, driven by hand.
pub struct DispatchHarness {
    pub _dir: TempDir,
    pub pool: DbPool,
    pub emergencies: Arc<SqlxEmergencyRepository>,
    pub acknowledgments: Arc<SqlxAcknowledgmentRepository>,
    pub jobs: Arc<SqlxNotificationJobRepository>,
    pub batches: Arc<SqlxBatchRepository>,
    pub contacts: Arc<InMemoryContactDirectory>,
    pub dispatcher: Arc<NotificationDispatcher>,
}

impl DispatchHarness {
    pub async fn new(senders: SenderRegistry) -> Self {
        let (dir, pool) = setup_pool().await;
        let emergencies = Arc::new(SqlxEmergencyRepository::new(pool.clone()));
        let acknowledgments = Arc::new(SqlxAcknowledgmentRepository::new(pool.clone()));
        let jobs = Arc::new(SqlxNotificationJobRepository::new(pool.clone()));
        let batches = Arc::new(SqlxBatchRepository::new(pool.clone()));
        let contacts = Arc::new(InMemoryContactDirectory::new());

        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(NotificationQueue::new(jobs.clone())),
            batches.clone(),
            emergencies.clone(),
            contacts.clone(),
            senders,
            RetryPolicyResolver::new(fast_retry_table()),
            DispatcherConfig::default(),
        ));

        Self {
            _dir: dir,
            pool,
            emergencies,
            acknowledgments,
            jobs,
            batches,
            contacts,
            dispatcher,
        }
    }

    /// Insert an ACTIVE emergency for `user_id`.
    pub async fn active_emergency(&self, user_id: &str, emergency_type: EmergencyType) -> Emergency {
        let emergency = Emergency::new(user_id, emergency_type, Location::new(40.7128, -74.006), 10);
        self.emergencies.create(&emergency).await.unwrap();
        self.emergencies
            .update_status(&emergency.id, EmergencyStatus::Active)
            .await
            .unwrap()
    }

    /// Claim and process jobs of `lane` until it is empty and no retry is
    /// waiting. Returns the outcomes in processing order.
    pub async fn drain(&self, lane: Lane) -> Vec<JobOutcome> {
        let queue = self.dispatcher.queue().clone();
        let dispatcher = self.dispatcher.clone();
        tokio::time::timeout(Duration::from_secs(10), async move {
            let mut outcomes = Vec::new();
            loop {
                match queue.dequeue(lane).await.unwrap() {
                    Some(job) => outcomes.push(dispatcher.process(job).await.unwrap()),
                    None if queue.scheduled_retry_count() > 0 => {
                        tokio::time::sleep(Duration::from_millis(5)).await
                    }
                    None => return outcomes,
                }
            }
        })
        .await
        .expect("lane did not drain")
    }
}

pub fn contact(id: &str, name: &str, info: ContactInfo) -> EmergencyContact {
    EmergencyContact::new(id, name, info)
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

/// Engine config for tests: millisecond retries, fast polling, no countdown.
pub fn test_engine_config() -> sos_dispatch::config::EngineConfig {
    use sos_dispatch::notification::WorkerPoolConfig;

    sos_dispatch::config::EngineConfig {
        countdown_seconds: 0,
        retry: fast_retry_table(),
        expedited_pool: WorkerPoolConfig {
            workers: 4,
            poll_interval_ms: 10,
        },
        standard_pool: WorkerPoolConfig {
            workers: 1,
            poll_interval_ms: 10,
        },
        ..Default::default()
    }
}

/// A started container over a temp database.
pub async fn start_engine(
    senders: SenderRegistry,
    contacts: Arc<InMemoryContactDirectory>,
) -> (TempDir, sos_dispatch::services::ServiceContainer) {
    let (dir, pool) = setup_pool().await;
    let container = sos_dispatch::services::ServiceContainer::with_components(
        pool,
        &test_engine_config(),
        senders,
        contacts,
    );
    container.start().await.unwrap();
    (dir, container)
}
