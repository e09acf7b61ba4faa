//! Domain layer.
//!
//! This module contains the emergency lifecycle, acknowledgments and the
//! value objects shared with the notification layer.

pub mod emergency;
pub mod value_objects;

pub use emergency::{Acknowledgment, Emergency, EmergencyStatus, HistoryFilters};
pub use value_objects::*;
