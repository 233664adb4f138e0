// src/pipeline.rs

//! From a workflow document and an event to a finished, judged run.
//!
//! Planning is pure: trigger check, matrix expansion, `--job` selection and
//! the instance-graph check all happen before anything is registered or
//! dispatched, so a malformed graph never starts a job. Execution registers
//! the run in its concurrency group, drives the runtime to completion and
//! reduces the result to a verdict.

use std::collections::{BTreeSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};

use crate::aggregate::{GatingPolicy, RunAggregator, RunVerdict};
use crate::dag::{InstanceGraph, Scheduler};
use crate::engine::{ConcurrencyGroups, CoreRuntime, Runtime, RuntimeEvent};
use crate::errors::{CidagError, Result};
use crate::exec::{ExecutorBackend, RunnerSettings};
use crate::expr::{interpolate, ExprContext, NoFunctions};
use crate::logging::run_span;
use crate::matrix::{self, InstanceId, JobInstance};
use crate::run_result::RunResult;
use crate::trigger::{self, EventDescriptor, TriggerDecision};
use crate::workflow::{JobName, StepKind, WorkflowDocument};

/// Capacity of a run's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything needed to start a run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub event: EventDescriptor,
    pub instances: Vec<JobInstance>,
    /// Immediate dependencies per instance, in instance order.
    pub edges: Vec<(InstanceId, Vec<InstanceId>)>,
}

impl RunPlan {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Plan a run. `Ok(None)` means the event does not trigger the workflow.
pub fn plan(
    doc: &WorkflowDocument,
    event: &EventDescriptor,
    job_filter: Option<&str>,
) -> Result<Option<RunPlan>> {
    if trigger::evaluate(doc.triggers(), event) == TriggerDecision::Skip {
        info!(event = %event.kind, branch = %event.branch, "event does not trigger this workflow");
        return Ok(None);
    }

    let mut instances = matrix::expand_all(doc);
    if let Some(job) = job_filter {
        let selected = select_jobs(doc, job)?;
        instances.retain(|i| selected.contains(&i.id.job));
    }

    let graph = InstanceGraph::build(&instances)?;
    let edges = instances
        .iter()
        .enumerate()
        .map(|(idx, instance)| {
            let deps = graph
                .dependencies_of(idx)
                .iter()
                .map(|&d| instances[d].id.clone())
                .collect();
            (instance.id.clone(), deps)
        })
        .collect();

    info!(instances = instances.len(), "run planned");
    Ok(Some(RunPlan {
        event: event.clone(),
        instances,
        edges,
    }))
}

/// `job` plus every job it transitively needs.
pub fn select_jobs(doc: &WorkflowDocument, job: &str) -> Result<BTreeSet<JobName>> {
    if doc.job(job).is_none() {
        return Err(CidagError::ConfigError(format!(
            "unknown job '{job}' (known jobs: {})",
            doc.jobs()
                .iter()
                .map(|j| j.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let mut selected = BTreeSet::new();
    let mut queue = VecDeque::from([job.to_string()]);
    while let Some(name) = queue.pop_front() {
        if !selected.insert(name.clone()) {
            continue;
        }
        if let Some(spec) = doc.job(&name) {
            queue.extend(spec.needs.iter().cloned());
        }
    }
    Ok(selected)
}

/// Context for job-level `if:` conditions: runner, event and process env.
pub fn condition_context(settings: &RunnerSettings) -> ExprContext {
    let mut ctx = settings.base_context();
    ctx.env = settings.host_env.clone();
    ctx.env
        .extend(settings.workflow_env.iter().map(|(k, v)| (k.clone(), v.clone())));
    ctx
}

/// Runs plans inside concurrency groups and judges the results.
#[derive(Debug)]
pub struct Pipeline {
    groups: Arc<ConcurrencyGroups>,
    concurrency: usize,
    policy: GatingPolicy,
    context: ExprContext,
}

impl Pipeline {
    pub fn new(groups: Arc<ConcurrencyGroups>, concurrency: usize, policy: GatingPolicy) -> Self {
        Self {
            groups,
            concurrency,
            policy,
            context: ExprContext::for_host(),
        }
    }

    pub fn with_context(mut self, ctx: ExprContext) -> Self {
        self.context = ctx;
        self
    }

    pub fn groups(&self) -> &Arc<ConcurrencyGroups> {
        &self.groups
    }

    /// Execute `plan` to completion.
    ///
    /// `make_executor` receives the run's event sender; the backend it
    /// returns must report every dispatched instance on it. Registering the
    /// run supersedes any live run for the same event key.
    pub async fn execute<E, F>(&self, plan: RunPlan, make_executor: F) -> Result<(RunResult, RunVerdict)>
    where
        E: ExecutorBackend,
        F: FnOnce(mpsc::Sender<RuntimeEvent>) -> E,
    {
        if self.concurrency == 0 {
            return Err(CidagError::ConfigError(
                "concurrency must be >= 1 (got 0)".to_string(),
            ));
        }

        let key = plan.event.concurrency_key();
        let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(EVENT_CHANNEL_CAPACITY);

        let registration = self.groups.register(&key, rt_tx.clone()).await;
        let run_id = registration.run_id;
        let span = run_span(run_id, &plan.event);
        if let Some(old) = registration.superseded {
            warn!(run_id, superseded = old, key = %key, "newer run supersedes a live run");
        }

        let scheduler = match Scheduler::new(plan.instances, self.concurrency, run_id) {
            Ok(s) => s.with_context(self.context.clone()),
            Err(e) => {
                self.groups.release(&key, run_id);
                return Err(e);
            }
        };

        let executor = make_executor(rt_tx);
        let runtime = Runtime::new(CoreRuntime::new(scheduler), rt_rx, executor);
        let outcome = runtime.run().instrument(span).await;
        self.groups.release(&key, run_id);

        let result = outcome?;
        let verdict = RunAggregator::new(self.policy.clone()).finalize(&result).clone();
        Ok((result, verdict))
    }
}

/// Text for `--dry-run`: trigger decision, instances, edges and commands.
pub fn render_dry_run(
    doc: &WorkflowDocument,
    event: &EventDescriptor,
    plan: Option<&RunPlan>,
    base: &ExprContext,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "cidag dry-run: {}",
        doc.name().unwrap_or("(unnamed workflow)")
    );
    let _ = writeln!(out, "  event: {} on '{}'", event.kind, event.branch);

    let Some(plan) = plan else {
        let _ = writeln!(out, "  trigger: skip (nothing would run)");
        return out;
    };
    let _ = writeln!(out, "  trigger: run");
    let _ = writeln!(out);
    let _ = writeln!(out, "instances ({}):", plan.len());

    for (instance, (_, deps)) in plan.instances.iter().zip(&plan.edges) {
        let _ = writeln!(out, "  - {}", instance.id);
        if !deps.is_empty() {
            let names: Vec<String> = deps.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "      needs: {}", names.join(", "));
        }
        if let Some(cond) = &instance.spec.condition {
            let _ = writeln!(out, "      if: {}", cond.source());
        }

        let mut ctx = base.clone();
        ctx.matrix = instance.matrix.clone();
        ctx.env.extend(instance.spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        for step in &instance.spec.steps {
            let line = match &step.kind {
                StepKind::Run { command, .. } => {
                    let rendered =
                        interpolate(command, &ctx, &NoFunctions).unwrap_or_else(|_| command.clone());
                    format!("run: {}", rendered.trim())
                }
                StepKind::Action { reference, .. } => format!("uses: {reference}"),
            };
            let _ = writeln!(out, "      * {}: {}", step.display_name(), line);
        }
    }
    out
}
