// src/engine/mod.rs

//! Orchestration engine for one workflow run.
//!
//! This module ties together:
//! - the instance scheduler
//! - the runtime event loop that reacts to:
//!   - instance completion reports from the executor
//!   - cancellation (superseded run, Ctrl-C)
//!   - hard shutdown
//! - the concurrency-group registry that supersedes older runs
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::run_result::JobReport;

/// Events flowing into the runtime from the executor, signal handlers and
/// the concurrency-group registry.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched instance finished (succeeded, failed or cancelled).
    InstanceCompleted { report: JobReport },
    /// Cancel the run cooperatively: nothing new starts, in-flight instances
    /// are signalled, and the loop ends once they report back.
    CancelRequested { reason: String },
    /// Stop the loop immediately.
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod groups;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use groups::{ConcurrencyGroups, RunRegistration};
pub use runtime::Runtime;
