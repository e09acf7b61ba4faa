//! Database models.
//!
//! These models map directly to the database schema and convert to and from
//! the domain types.

pub mod emergency;
pub mod notification;

pub use emergency::*;
pub use notification::*;
