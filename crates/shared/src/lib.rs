//! Shared types for the taskchat session manager and its backends.

pub mod models;
pub mod protocol;

pub use models::*;
pub use protocol::*;
