//! Emergency aggregate.

mod acknowledgment;
mod entity;
mod history;
mod state;

pub use acknowledgment::Acknowledgment;
pub use entity::Emergency;
pub use history::HistoryFilters;
pub use state::EmergencyStatus;
