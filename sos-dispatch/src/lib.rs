//! sos-dispatch library crate.
//!
//! Emergency notification dispatch and escalation engine: the emergency
//! lifecycle, prioritized multi-channel fan-out to contacts with retries and
//! channel fallback, and escalation when nobody acknowledges in time.

pub mod config;
pub mod countdown;
pub mod database;
pub mod domain;
pub mod error;
pub mod escalation;
pub mod logging;
pub mod notification;
pub mod services;

pub use error::{Error, Result};
