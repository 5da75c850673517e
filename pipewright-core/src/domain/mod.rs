//! Core domain types
//!
//! These types represent the fundamental entities and are shared between the
//! daemon (for persistence and orchestration) and the plugin runtime (for
//! installation and invocation).

pub mod log;
pub mod pipeline;
pub mod plugin;
pub mod trace;
