// src/dag/state_manager.rs

//! Per-run state transitions for job instances.

use tracing::{debug, info, warn};

use crate::dag::graph::InstanceGraph;
use crate::dag::instance_info::{InstanceInfo, InstanceState, SkipReason};
use crate::expr::{ExprContext, NoFunctions, StatusContext};
use crate::matrix::InstanceId;

/// Aggregate view of an instance's dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamStatus {
    pub all_terminal: bool,
    pub all_succeeded: bool,
    pub any_failed: bool,
    pub any_skipped: bool,
}

/// What to do with a pending instance whose fate can be decided now.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Wait,
    Ready,
    Skip(SkipReason),
    Fail(String),
}

/// Manages per-run state transitions for instances.
pub struct StateManager<'a> {
    graph: &'a InstanceGraph,
    infos: &'a mut [InstanceInfo],
    base_ctx: &'a ExprContext,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a InstanceGraph,
        infos: &'a mut [InstanceInfo],
        base_ctx: &'a ExprContext,
    ) -> Self {
        Self {
            graph,
            infos,
            base_ctx,
        }
    }

    pub fn upstream_status(&self, idx: usize) -> UpstreamStatus {
        upstream_status(self.graph, self.infos, idx)
    }

    /// Resolve every pending instance that can be skipped or failed, until
    /// nothing changes. Skips cascade through the graph in this loop.
    pub fn propagate(&mut self) -> (Vec<(InstanceId, SkipReason)>, Vec<InstanceId>) {
        let mut skipped = Vec::new();
        let mut failed = Vec::new();

        loop {
            let mut changed = false;
            for idx in 0..self.infos.len() {
                if self.infos[idx].state != InstanceState::Pending {
                    continue;
                }
                match self.resolve(idx) {
                    Resolution::Skip(reason) => {
                        let info = &mut self.infos[idx];
                        info.state = InstanceState::Skipped(reason);
                        debug!(instance = %info.id(), %reason, "instance skipped");
                        skipped.push((info.id().clone(), reason));
                        changed = true;
                    }
                    Resolution::Fail(message) => {
                        let info = &mut self.infos[idx];
                        info.state = InstanceState::Failed;
                        warn!(instance = %info.id(), error = %message, "job condition failed to evaluate");
                        failed.push(info.id().clone());
                        changed = true;
                    }
                    Resolution::Wait | Resolution::Ready => {}
                }
            }
            if !changed {
                break;
            }
        }

        (skipped, failed)
    }

    /// Mark up to `limit` ready instances as `Running`, in instance order.
    pub fn collect_ready(&mut self, limit: usize) -> Vec<usize> {
        let mut ready = Vec::new();
        for idx in 0..self.infos.len() {
            if ready.len() >= limit {
                break;
            }
            if self.infos[idx].state == InstanceState::Pending
                && self.resolve(idx) == Resolution::Ready
            {
                let info = &mut self.infos[idx];
                info.state = InstanceState::Running;
                info!(instance = %info.id(), "dependencies satisfied; dispatching");
                ready.push(idx);
            }
        }
        ready
    }

    /// Decide the fate of a pending instance from its dependencies and `if:`.
    fn resolve(&self, idx: usize) -> Resolution {
        let up = self.upstream_status(idx);
        let spec = &self.infos[idx].instance.spec;
        let overrides = spec
            .condition
            .as_ref()
            .is_some_and(|c| c.uses_status_function());

        if !overrides {
            // Eager: a failed dependency decides this instance before its
            // siblings finish.
            if up.any_failed {
                return Resolution::Skip(SkipReason::UpstreamFailed);
            }
            if !up.all_terminal {
                return Resolution::Wait;
            }
            if up.any_skipped {
                return Resolution::Skip(SkipReason::UpstreamSkipped);
            }
        } else if !up.all_terminal {
            return Resolution::Wait;
        }

        let Some(condition) = &spec.condition else {
            return Resolution::Ready;
        };

        let mut ctx = self.base_ctx.clone();
        ctx.matrix = self.infos[idx].instance.matrix.clone();
        ctx.env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        ctx.status = StatusContext {
            success: up.all_succeeded,
            failure: up.any_failed,
            cancelled: false,
        };

        match condition.evaluate(&ctx, &NoFunctions) {
            Ok(true) => Resolution::Ready,
            Ok(false) if up.any_failed => Resolution::Skip(SkipReason::UpstreamFailed),
            Ok(false) if up.any_skipped => Resolution::Skip(SkipReason::UpstreamSkipped),
            Ok(false) => Resolution::Skip(SkipReason::ConditionFalse),
            Err(e) => Resolution::Fail(e.to_string()),
        }
    }

    /// Cancel every pending instance. Returns the cancelled ids.
    pub fn cancel_pending(&mut self) -> Vec<InstanceId> {
        let mut cancelled = Vec::new();
        for info in self.infos.iter_mut() {
            if info.state == InstanceState::Pending {
                info.state = InstanceState::Cancelled;
                cancelled.push(info.id().clone());
            }
        }
        cancelled
    }

    pub fn all_terminal(&self) -> bool {
        self.infos.iter().all(|info| info.state.is_terminal())
    }
}

/// Read-only dependency summary; shared with [`crate::dag::Scheduler`].
pub fn upstream_status(graph: &InstanceGraph, infos: &[InstanceInfo], idx: usize) -> UpstreamStatus {
    let mut status = UpstreamStatus {
        all_terminal: true,
        all_succeeded: true,
        any_failed: false,
        any_skipped: false,
    };
    for &dep in graph.dependencies_of(idx) {
        let state = infos[dep].state;
        status.all_terminal &= state.is_terminal();
        status.all_succeeded &= state == InstanceState::Succeeded;
        status.any_failed |= state.is_failure_like();
        status.any_skipped |= matches!(
            state,
            InstanceState::Skipped(SkipReason::ConditionFalse | SkipReason::UpstreamSkipped)
        );
    }
    status
}
