// src/dag/instance_info.rs

//! Per-instance run state and the types exchanged with the executor.

use std::fmt;

use crate::matrix::{InstanceId, JobInstance};

/// Why an instance was skipped without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// A dependency failed or was cancelled (directly or transitively).
    UpstreamFailed,
    /// A dependency was skipped by its own condition.
    UpstreamSkipped,
    /// The job's `if:` evaluated to false.
    ConditionFalse,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::UpstreamFailed => "upstream failed",
            SkipReason::UpstreamSkipped => "upstream skipped",
            SkipReason::ConditionFalse => "condition false",
        })
    }
}

/// Lifecycle of a job instance within one run.
///
/// `Pending -> Running -> {Succeeded, Failed, Cancelled}`, or
/// `Pending -> {Skipped, Cancelled, Failed}` without ever running. Terminal
/// states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped(SkipReason),
    Cancelled,
}

impl InstanceState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, InstanceState::Pending | InstanceState::Running)
    }

    /// Terminal states that block dependents (unless their condition overrides).
    pub fn is_failure_like(self) -> bool {
        matches!(
            self,
            InstanceState::Failed
                | InstanceState::Cancelled
                | InstanceState::Skipped(SkipReason::UpstreamFailed)
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Pending => f.write_str("pending"),
            InstanceState::Running => f.write_str("running"),
            InstanceState::Succeeded => f.write_str("succeeded"),
            InstanceState::Failed => f.write_str("failed"),
            InstanceState::Skipped(reason) => write!(f, "skipped ({reason})"),
            InstanceState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Final outcome reported by the executor for a dispatched instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl From<InstanceOutcome> for InstanceState {
    fn from(outcome: InstanceOutcome) -> Self {
        match outcome {
            InstanceOutcome::Succeeded => InstanceState::Succeeded,
            InstanceOutcome::Failed => InstanceState::Failed,
            InstanceOutcome::Cancelled => InstanceState::Cancelled,
        }
    }
}

/// Static instance data plus its state in the current run.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub instance: JobInstance,
    pub state: InstanceState,
}

impl InstanceInfo {
    pub fn new(instance: JobInstance) -> Self {
        Self {
            instance,
            state: InstanceState::Pending,
        }
    }

    pub fn id(&self) -> &InstanceId {
        &self.instance.id
    }
}

/// An instance the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledInstance {
    pub instance: JobInstance,
    /// Identifier shared by every instance of the same run.
    pub run_id: u64,
}

impl ScheduledInstance {
    pub fn id(&self) -> &InstanceId {
        &self.instance.id
    }
}
