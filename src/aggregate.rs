// src/aggregate.rs

//! Reduce per-instance outcomes to one run verdict.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use tracing::{info, warn};

use crate::dag::InstanceState;
use crate::matrix::InstanceId;
use crate::run_result::RunResult;

/// Which jobs gate the run.
///
/// An empty `required` list means every job is required, except jobs marked
/// `continue-on-error: true`, which never gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatingPolicy {
    pub required: Vec<String>,
}

impl GatingPolicy {
    pub fn all_jobs() -> Self {
        Self::default()
    }

    pub fn required<I, S>(jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: jobs.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Success => "success",
            Verdict::Failure => "failure",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunVerdict {
    pub outcome: Verdict,
    /// Required instances that did not succeed, in run order.
    pub blocking: Vec<InstanceId>,
}

impl RunVerdict {
    pub fn is_success(&self) -> bool {
        self.outcome == Verdict::Success
    }
}

/// Computes the verdict once and hands out the same value afterwards.
#[derive(Debug, Default)]
pub struct RunAggregator {
    policy: GatingPolicy,
    verdict: OnceLock<RunVerdict>,
}

impl RunAggregator {
    pub fn new(policy: GatingPolicy) -> Self {
        Self {
            policy,
            verdict: OnceLock::new(),
        }
    }

    pub fn policy(&self) -> &GatingPolicy {
        &self.policy
    }

    /// The verdict, if `finalize` already ran.
    pub fn verdict(&self) -> Option<&RunVerdict> {
        self.verdict.get()
    }

    /// Compute and emit the verdict. Later calls return the first verdict
    /// untouched, whatever result they are given.
    pub fn finalize(&self, result: &RunResult) -> &RunVerdict {
        self.verdict.get_or_init(|| {
            let verdict = self.compute(result);
            info!(
                run_id = result.run_id,
                verdict = %verdict.outcome,
                blocking = verdict.blocking.len(),
                "run finished"
            );
            verdict
        })
    }

    fn compute(&self, result: &RunResult) -> RunVerdict {
        let explicit: BTreeSet<&str> = self.policy.required.iter().map(String::as_str).collect();

        if !explicit.is_empty() {
            for name in &explicit {
                if !result.instances.iter().any(|r| r.id.job == *name) {
                    warn!(job = name, "required job has no instances in this run; ignoring");
                }
            }
        }

        let blocking: Vec<InstanceId> = result
            .instances
            .iter()
            .filter(|r| {
                if explicit.is_empty() {
                    !r.continue_on_error
                } else {
                    explicit.contains(r.id.job.as_str())
                }
            })
            .filter(|r| !gate_passes(r.state))
            .map(|r| r.id.clone())
            .collect();

        let outcome = if blocking.is_empty() {
            Verdict::Success
        } else {
            Verdict::Failure
        };
        RunVerdict { outcome, blocking }
    }
}

/// A condition-false skip (or a skip cascading from one) is a deliberate
/// no-op; any other non-success fails the gate.
fn gate_passes(state: InstanceState) -> bool {
    use crate::dag::SkipReason;
    matches!(
        state,
        InstanceState::Succeeded
            | InstanceState::Skipped(SkipReason::ConditionFalse)
            | InstanceState::Skipped(SkipReason::UpstreamSkipped)
    )
}
