//! Notification dispatch.
//!
//! Delivers emergency alerts to contacts over PUSH, SMS and EMAIL with
//! per-channel retry policies and channel fallback.
//!
//! # Features
//!
//! - Two physically separate lanes: EMERGENCY/HIGH jobs go to the expedited
//!   lane, everything else to the standard lane, each with its own workers
//! - Durable job queue in SQLite with atomic claims
//! - Delayed requeue for retries, never blocking a worker
//! - Channel fallback (PUSH → SMS → EMAIL) once a channel is exhausted
//! - Additive batch statistics per fan-out
//!
//! # Example
//!
//! ```ignore
//! use sos_dispatch::notification::{NotificationDispatcher, DispatchWorkerPool, WorkerPoolConfig};
//! use sos_dispatch::domain::Lane;
//!
//! let pool = DispatchWorkerPool::new(Lane::Expedited, WorkerPoolConfig::expedited());
//! pool.start(dispatcher.clone());
//! dispatcher.dispatch_emergency(&emergency).await?;
//! ```

pub mod channels;
pub mod contacts;
pub mod dispatcher;
pub mod job;
pub mod queue;
pub mod retry;
pub mod template;
pub mod worker_pool;

pub use channels::{ChannelSender, ErrorClass, SendResult, SenderRegistry};
pub use contacts::{ContactDirectory, EmergencyContact, InMemoryContactDirectory};
pub use dispatcher::{
    DispatchSummary, DispatcherConfig, DispatcherStats, JobOutcome, NotificationDispatcher,
};
pub use job::{CancelledJob, JobStatus, NotificationJob};
pub use queue::NotificationQueue;
pub use retry::{RetryDecision, RetryPolicyResolver, RetryPolicyTable, StopReason};
pub use template::{RenderedMessage, TemplateFields};
pub use worker_pool::{DispatchWorkerPool, WorkerPoolConfig};
