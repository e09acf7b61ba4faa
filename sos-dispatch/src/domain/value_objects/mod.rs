//! Domain value objects.

mod channel;
mod emergency_type;
mod location;
mod priority;

pub use channel::{Channel, ContactInfo};
pub use emergency_type::EmergencyType;
pub use location::Location;
pub use priority::{Lane, Priority};
