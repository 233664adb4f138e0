// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::instance_info::{ScheduledInstance, SkipReason};
use crate::matrix::InstanceId;

/// Structured result of a single scheduler "step".
///
/// Tests drive the scheduler by hand and assert on what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Instances dispatched to runner slots in this step.
    pub newly_scheduled: Vec<ScheduledInstance>,
    /// Instances skipped without running.
    pub newly_skipped: Vec<(InstanceId, SkipReason)>,
    /// Instances that failed before running (job condition errors).
    pub newly_failed: Vec<InstanceId>,
    /// Pending instances cancelled without running.
    pub newly_cancelled: Vec<InstanceId>,
    /// Whether every instance is now terminal.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    pub fn scheduled_ids(&self) -> Vec<InstanceId> {
        self.newly_scheduled.iter().map(|s| s.id().clone()).collect()
    }
}
