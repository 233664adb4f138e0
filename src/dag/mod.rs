// src/dag/mod.rs

//! Instance graph and scheduling.
//!
//! - [`graph`] holds the dependency graph among job instances.
//! - [`scheduler`] contains the per-run state machine that decides
//!   which instances are ready, skipped or cancelled.
//! - [`instance_info`] provides instance states and scheduled instance types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod instance_info;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use graph::InstanceGraph;
pub use instance_info::{InstanceOutcome, InstanceState, ScheduledInstance, SkipReason};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
