//! Service Module
//!
//! Business logic layer for the daemon.
//! Services orchestrate between the store, the plugin runtime and traces.

pub mod pipeline;
pub mod trace;

pub use pipeline::{PipelineService, ServiceError};
pub use trace::{TraceContext, TraceError, TraceFailure, TraceRegistry};
