// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) reads events from channels,
//! hands `ScheduledInstance`s to the executor and forwards cancellations.
//!
//! The core is unit tested without any Tokio, channels, filesystem, or
//! processes.

use std::collections::HashMap;

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    handle_cancel_request, handle_instance_completion, handle_start, CoreStep,
};
use crate::engine::RuntimeEvent;
use crate::matrix::InstanceId;
use crate::run_result::{InstanceResult, JobReport, RunResult};

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    reports: HashMap<InstanceId, JobReport>,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            reports: HashMap::new(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Dispatch the first wave of instances.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::InstanceCompleted { report } => {
                handle_instance_completion(&mut self.scheduler, &mut self.reports, report)
            }
            RuntimeEvent::CancelRequested { reason } => {
                handle_cancel_request(&mut self.scheduler, &reason)
            }
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }

    /// Final per-instance states plus the collected reports.
    pub fn into_result(mut self) -> RunResult {
        let continue_flags: HashMap<InstanceId, bool> = self
            .scheduler
            .instances()
            .map(|inst| (inst.id.clone(), inst.spec.continue_on_error))
            .collect();

        let instances = self
            .scheduler
            .states()
            .into_iter()
            .map(|(id, state)| InstanceResult {
                continue_on_error: continue_flags.get(&id).copied().unwrap_or(false),
                report: self.reports.remove(&id),
                id,
                state,
            })
            .collect();

        RunResult {
            run_id: self.scheduler.run_id(),
            instances,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{InstanceOutcome, InstanceState, SkipReason};
    use crate::engine::CoreCommand;
    use crate::matrix::expand;
    use crate::workflow::JobSpec;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(name: &str, needs: &[&str]) -> Arc<JobSpec> {
        Arc::new(JobSpec {
            name: name.into(),
            display_name: None,
            runs_on: None,
            needs: needs.iter().map(|n| n.to_string()).collect(),
            condition: None,
            matrix: None,
            env: BTreeMap::new(),
            steps: vec![],
            continue_on_error: false,
        })
    }

    fn core(jobs: &[Arc<JobSpec>], k: usize) -> CoreRuntime {
        let instances = jobs.iter().flat_map(expand).collect();
        CoreRuntime::new(Scheduler::new(instances, k, 7).unwrap())
    }

    fn report(name: &str, outcome: InstanceOutcome) -> RuntimeEvent {
        RuntimeEvent::InstanceCompleted {
            report: JobReport {
                id: InstanceId::plain(name),
                outcome,
                steps: vec![],
                duration: Duration::ZERO,
            },
        }
    }

    fn dispatched(step: &CoreStep) -> Vec<String> {
        step.commands
            .iter()
            .flat_map(|c| match c {
                CoreCommand::DispatchInstances(list) => {
                    list.iter().map(|s| s.id().to_string()).collect()
                }
                _ => Vec::new(),
            })
            .collect()
    }

    #[test]
    fn chain_runs_in_order_and_finishes() {
        let mut core = core(&[job("a", &[]), job("b", &["a"])], 4);
        let step = core.start();
        assert_eq!(dispatched(&step), vec!["a"]);
        assert!(step.keep_running);

        let step = core.step(report("a", InstanceOutcome::Succeeded));
        assert_eq!(dispatched(&step), vec!["b"]);

        let step = core.step(report("b", InstanceOutcome::Succeeded));
        assert!(!step.keep_running);
        assert!(matches!(step.commands.last(), Some(CoreCommand::Finish)));

        let result = core.into_result();
        assert_eq!(result.run_id, 7);
        assert!(result.instances.iter().all(|r| r.report.is_some()));
    }

    #[test]
    fn failure_finishes_run_with_skips() {
        let mut core = core(&[job("a", &[]), job("b", &["a"])], 4);
        core.start();
        let step = core.step(report("a", InstanceOutcome::Failed));
        assert!(!step.keep_running);
        let result = core.into_result();
        assert_eq!(
            result.state_of(&InstanceId::plain("b")),
            Some(InstanceState::Skipped(SkipReason::UpstreamFailed))
        );
        assert!(result.get(&InstanceId::plain("b")).unwrap().report.is_none());
    }

    #[test]
    fn cancel_signals_in_flight_and_waits_for_them() {
        let mut core = core(&[job("a", &[]), job("b", &["a"])], 4);
        core.start();
        let step = core.step(RuntimeEvent::CancelRequested {
            reason: "superseded".into(),
        });
        assert!(step.keep_running);
        assert!(step.commands.iter().any(|c| matches!(
            c,
            CoreCommand::CancelInstances(ids) if ids == &vec![InstanceId::plain("a")]
        )));

        // A second request is a no-op.
        let again = core.step(RuntimeEvent::CancelRequested {
            reason: "again".into(),
        });
        assert!(again.commands.is_empty());

        let step = core.step(report("a", InstanceOutcome::Cancelled));
        assert!(!step.keep_running);
    }

    #[test]
    fn empty_run_finishes_at_start() {
        let mut core = core(&[], 1);
        let step = core.start();
        assert!(!step.keep_running);
    }
}
