//! Repository layer for database access.
//!
//! Each repository is an `async_trait` with a SQLx implementation, so the
//! engine's services can be exercised against in-memory fakes.

pub mod acknowledgment;
pub mod batch;
pub mod emergency;
pub mod notification_job;

pub use acknowledgment::*;
pub use batch::*;
pub use emergency::*;
pub use notification_job::*;
