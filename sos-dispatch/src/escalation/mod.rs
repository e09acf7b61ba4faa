//! Escalation monitoring.
//!
//! Tracks ACTIVE emergencies that nobody has acknowledged yet and emits an
//! [`EscalationEvent`] when the escalation timeout elapses without any
//! acknowledgment. At most one timer exists per emergency; the timers live
//! in an owned [`TimerRegistry`] injected into the monitor.

pub mod events;
pub mod monitor;
pub mod registry;

pub use events::{EscalationEvent, EscalationEventBroadcaster, EscalationReason};
pub use monitor::{EscalationCheck, EscalationMonitor};
pub use registry::{TimerHandle, TimerRegistry};
