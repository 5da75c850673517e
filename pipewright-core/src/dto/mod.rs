//! Data Transfer Objects
//!
//! Request and response shapes of the daemon's HTTP surface. Field names
//! are camelCase on the wire.

pub mod pipeline;
pub mod trace;
