// src/dag/scheduler.rs

use tracing::{debug, info, warn};

use crate::dag::graph::InstanceGraph;
use crate::dag::instance_info::{InstanceInfo, InstanceOutcome, InstanceState, ScheduledInstance};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{upstream_status, StateManager, UpstreamStatus};
use crate::errors::Result;
use crate::expr::ExprContext;
use crate::matrix::{InstanceId, JobInstance};

/// Scheduler holds the instance graph plus per-run state.
///
/// It is responsible for:
/// - deciding when a pending instance is ready (all dependencies terminal
///   and successful, or its `if:` overrides)
/// - keeping at most `concurrency` instances running
/// - skipping dependents of failed instances without running them
/// - cancelling pending work when the run is superseded
///
/// It performs no IO; the engine feeds it completions and dispatches what it
/// returns.
#[derive(Debug)]
pub struct Scheduler {
    graph: InstanceGraph,
    infos: Vec<InstanceInfo>,
    concurrency: usize,
    running: usize,
    run_id: u64,
    cancelled: bool,
    /// Workflow-level context for job `if:` conditions.
    base_ctx: ExprContext,
}

impl Scheduler {
    /// Build a scheduler for one run. Fails on cyclic dependencies, before
    /// anything is dispatched.
    pub fn new(instances: Vec<JobInstance>, concurrency: usize, run_id: u64) -> Result<Self> {
        let graph = InstanceGraph::build(&instances)?;
        Ok(Self {
            graph,
            infos: instances.into_iter().map(InstanceInfo::new).collect(),
            concurrency: concurrency.max(1),
            running: 0,
            run_id,
            cancelled: false,
            base_ctx: ExprContext::default(),
        })
    }

    /// Context used to evaluate job conditions (env, runner, event).
    pub fn with_context(mut self, ctx: ExprContext) -> Self {
        self.base_ctx = ctx;
        self
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn running_count(&self) -> usize {
        self.running
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.infos.iter().all(|info| info.state.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn state_of(&self, id: &InstanceId) -> Option<InstanceState> {
        let idx = self.graph.index_of(id)?;
        Some(self.infos[idx].state)
    }

    /// Instance ids with their current state, in instance order.
    pub fn states(&self) -> Vec<(InstanceId, InstanceState)> {
        self.infos
            .iter()
            .map(|info| (info.id().clone(), info.state))
            .collect()
    }

    pub fn instances(&self) -> impl Iterator<Item = &JobInstance> {
        self.infos.iter().map(|info| &info.instance)
    }

    pub fn upstream_of(&self, id: &InstanceId) -> Option<UpstreamStatus> {
        let idx = self.graph.index_of(id)?;
        Some(upstream_status(&self.graph, &self.infos, idx))
    }

    /// Immediate dependencies of `id`, for diagnostics and dry runs.
    pub fn dependencies_of(&self, id: &InstanceId) -> Vec<InstanceId> {
        self.graph
            .index_of(id)
            .map(|idx| {
                self.graph
                    .dependencies_of(idx)
                    .iter()
                    .map(|&d| self.infos[d].id().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Dispatch the initial wave.
    pub fn start(&mut self) -> SchedulerStep {
        info!(run_id = self.run_id, instances = self.infos.len(), "scheduler: starting run");
        self.settle()
    }

    /// Record the outcome of a running instance and dispatch what it unblocks.
    pub fn complete(&mut self, id: &InstanceId, outcome: InstanceOutcome) -> SchedulerStep {
        let Some(idx) = self.graph.index_of(id) else {
            warn!(instance = %id, "completion for unknown instance; ignoring");
            return SchedulerStep::default();
        };

        let info = &mut self.infos[idx];
        if info.state != InstanceState::Running {
            warn!(
                instance = %id,
                state = %info.state,
                "completion for instance that is not running; ignoring"
            );
            return SchedulerStep::default();
        }

        info.state = outcome.into();
        self.running -= 1;
        match outcome {
            InstanceOutcome::Succeeded => {
                debug!(instance = %id, run_id = self.run_id, "instance succeeded")
            }
            InstanceOutcome::Failed => warn!(
                instance = %id,
                run_id = self.run_id,
                "instance failed; skipping dependents"
            ),
            InstanceOutcome::Cancelled => {
                info!(instance = %id, run_id = self.run_id, "instance cancelled")
            }
        }

        self.settle()
    }

    /// Stop dispatching. Pending instances become `Cancelled` right away;
    /// running ones are returned so the caller can signal them. They stay
    /// `Running` until their completion arrives.
    pub fn cancel_all(&mut self) -> (SchedulerStep, Vec<InstanceId>) {
        self.cancelled = true;
        let mut manager = StateManager::new(&self.graph, &mut self.infos, &self.base_ctx);
        let newly_cancelled = manager.cancel_pending();
        let run_just_finished = manager.all_terminal();

        let in_flight = self
            .infos
            .iter()
            .filter(|info| info.state == InstanceState::Running)
            .map(|info| info.id().clone())
            .collect::<Vec<_>>();

        info!(
            run_id = self.run_id,
            cancelled = newly_cancelled.len(),
            in_flight = in_flight.len(),
            "scheduler: run cancelled"
        );

        (
            SchedulerStep {
                newly_cancelled,
                run_just_finished,
                ..Default::default()
            },
            in_flight,
        )
    }

    /// Propagate skips, then fill free runner slots.
    fn settle(&mut self) -> SchedulerStep {
        let free = if self.cancelled {
            0
        } else {
            self.concurrency.saturating_sub(self.running)
        };

        let mut manager = StateManager::new(&self.graph, &mut self.infos, &self.base_ctx);
        let (newly_skipped, newly_failed) = manager.propagate();
        let ready = manager.collect_ready(free);
        let run_just_finished = manager.all_terminal();

        self.running += ready.len();
        let newly_scheduled = ready
            .into_iter()
            .map(|idx| ScheduledInstance {
                instance: self.infos[idx].instance.clone(),
                run_id: self.run_id,
            })
            .collect();

        if run_just_finished {
            info!(run_id = self.run_id, "scheduler: all instances terminal");
        }

        SchedulerStep {
            newly_scheduled,
            newly_skipped,
            newly_failed,
            newly_cancelled: Vec::new(),
            run_just_finished,
        }
    }
}
