//! Service layer.
//!
//! The emergency lifecycle orchestration, its events, and the container that
//! wires the engine together.

pub mod container;
pub mod emergency_service;
pub mod events;

pub use container::{DEFAULT_SHUTDOWN_TIMEOUT, ServiceContainer, ServiceStats, default_senders};
pub use emergency_service::{
    EmergencyDetails, EmergencyHistoryPage, EmergencyService, EmergencyServiceConfig,
    TriggerRequest,
};
pub use events::{EmergencyEvent, EmergencyEventBroadcaster};
