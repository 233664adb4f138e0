// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::dag::{ScheduledInstance, Scheduler, SchedulerStep};
use crate::matrix::InstanceId;
use crate::run_result::JobReport;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these instances to the executor.
    DispatchInstances(Vec<ScheduledInstance>),
    /// Signal these running instances to stop.
    CancelInstances(Vec<InstanceId>),
    /// Every instance is terminal; the run is over.
    Finish,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Translate a scheduler step into shell commands.
fn commands_from(step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();
    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchInstances(step.newly_scheduled));
    }
    if step.run_just_finished {
        commands.push(CoreCommand::Finish);
    }
    CoreStep {
        commands,
        keep_running: !step.run_just_finished,
    }
}

/// Seed the run.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    commands_from(scheduler.start())
}

/// Handle an instance completion report.
pub fn handle_instance_completion(
    scheduler: &mut Scheduler,
    reports: &mut HashMap<InstanceId, JobReport>,
    report: JobReport,
) -> CoreStep {
    let step = scheduler.complete(&report.id, report.outcome);
    reports.insert(report.id.clone(), report);
    commands_from(step)
}

/// Handle a cooperative cancellation request.
pub fn handle_cancel_request(scheduler: &mut Scheduler, reason: &str) -> CoreStep {
    if scheduler.is_cancelled() {
        warn!(reason, "run already cancelled; ignoring");
        return CoreStep {
            commands: Vec::new(),
            keep_running: !scheduler.is_finished(),
        };
    }

    info!(run_id = scheduler.run_id(), reason, "cancelling run");
    let (step, in_flight) = scheduler.cancel_all();

    let mut commands = Vec::new();
    if !in_flight.is_empty() {
        commands.push(CoreCommand::CancelInstances(in_flight));
    }
    if step.run_just_finished {
        commands.push(CoreCommand::Finish);
    }
    CoreStep {
        commands,
        keep_running: !step.run_just_finished,
    }
}
