// src/run_result.rs

//! Per-instance and per-step outcomes of a run.

use std::fmt;
use std::time::Duration;

use crate::dag::{InstanceOutcome, InstanceState};
use crate::matrix::InstanceId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    /// Non-zero exit (`exit_code` is `None` when the step never produced
    /// one, e.g. the command could not be spawned). `continued` is set when
    /// `continue-on-error` absorbed the failure.
    Failed {
        exit_code: Option<i32>,
        continued: bool,
    },
    Skipped,
    Cancelled,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Succeeded => f.write_str("ok"),
            StepStatus::Failed {
                exit_code,
                continued,
            } => {
                f.write_str("failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit {code})")?;
                }
                if *continued {
                    f.write_str(", continued")?;
                }
                Ok(())
            }
            StepStatus::Skipped => f.write_str("skipped"),
            StepStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    /// Captured stdout and stderr.
    pub output: String,
}

impl StepReport {
    pub fn new(name: impl Into<String>, status: StepStatus, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            output: output.into(),
        }
    }
}

/// What the step executor reports for one dispatched instance.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: InstanceId,
    pub outcome: InstanceOutcome,
    pub steps: Vec<StepReport>,
    pub duration: Duration,
}

impl JobReport {
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Final state of one instance, with its report when it ran.
#[derive(Debug, Clone)]
pub struct InstanceResult {
    pub id: InstanceId,
    pub state: InstanceState,
    /// The job has `continue-on-error: true`.
    pub continue_on_error: bool,
    pub report: Option<JobReport>,
}

/// Everything a run produced, in instance order.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub run_id: u64,
    pub instances: Vec<InstanceResult>,
}

impl RunResult {
    pub fn get(&self, id: &InstanceId) -> Option<&InstanceResult> {
        self.instances.iter().find(|r| &r.id == id)
    }

    pub fn state_of(&self, id: &InstanceId) -> Option<InstanceState> {
        self.get(id).map(|r| r.state)
    }

    pub fn count(&self, pred: impl Fn(InstanceState) -> bool) -> usize {
        self.instances.iter().filter(|r| pred(r.state)).count()
    }
}
