// src/exec/job_runner.rs

//! Step executor: runs one job instance's steps in declared order.
//!
//! - A step whose `if:` is false is skipped and does not affect the job.
//! - A failing step without `continue-on-error` fails the job; later steps
//!   are not executed.
//! - A failing step with `continue-on-error` is recorded and the job goes on.
//! - Cache steps are served by the [`CacheStore`]; saves happen after the
//!   last step of a successful job.
//! - On cancellation the in-flight step gets the grace period to stop, then
//!   the workspace is torn down regardless.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cache::{CacheAction, CacheDeclaration, CacheStore, ResolvedCache, RestoreOutcome, WorkspaceFunctions};
use crate::dag::{InstanceOutcome, ScheduledInstance};
use crate::exec::invoker::{ActionInvoker, Invocation, InvocationRequest};
use crate::exec::workspace::{RunnerContext, RunnerSettings};
use crate::exec::cancelled;
use crate::expr::{interpolate, ExprContext, FunctionHost};
use crate::fs::FileSystem;
use crate::run_result::{JobReport, StepReport, StepStatus};
use crate::workflow::{JobSpec, StepKind, StepSpec};

/// Status and captured output of one executed step.
struct StepRun {
    status: StepStatus,
    output: String,
}

impl StepRun {
    fn new(status: StepStatus, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }

    fn failed(step: &StepSpec, exit_code: Option<i32>, output: impl Into<String>) -> Self {
        Self::new(
            StepStatus::Failed {
                exit_code,
                continued: step.continue_on_error,
            },
            output,
        )
    }
}

#[derive(Debug, Clone)]
pub struct JobRunner {
    invoker: Arc<dyn ActionInvoker>,
    cache: Option<CacheStore>,
    fs: Arc<dyn FileSystem>,
    settings: Arc<RunnerSettings>,
}

impl JobRunner {
    pub fn new(
        invoker: Arc<dyn ActionInvoker>,
        cache: Option<CacheStore>,
        fs: Arc<dyn FileSystem>,
        settings: Arc<RunnerSettings>,
    ) -> Self {
        Self {
            invoker,
            cache,
            fs,
            settings,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run every step of `scheduled` and report the outcome.
    pub async fn run(&self, scheduled: ScheduledInstance, mut cancel: watch::Receiver<bool>) -> JobReport {
        let started = Instant::now();
        let id = scheduled.id().clone();

        if *cancel.borrow() {
            return JobReport {
                id,
                outcome: InstanceOutcome::Cancelled,
                steps: Vec::new(),
                duration: started.elapsed(),
            };
        }

        info!(instance = %id, run_id = scheduled.run_id, "starting job instance");
        let ctx = match RunnerContext::create(&self.settings, &scheduled, Arc::clone(&self.fs)).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(instance = %id, error = %format!("{e:#}"), "failed to set up runner context");
                return JobReport {
                    id,
                    outcome: InstanceOutcome::Failed,
                    steps: vec![StepReport::new(
                        "Set up job",
                        StepStatus::Failed {
                            exit_code: None,
                            continued: false,
                        },
                        format!("{e:#}"),
                    )],
                    duration: started.elapsed(),
                };
            }
        };

        let (outcome, steps) = self
            .run_steps(&ctx, &scheduled.instance.spec, &mut cancel)
            .await;
        ctx.teardown().await;

        let duration = started.elapsed();
        info!(
            instance = %id,
            run_id = scheduled.run_id,
            ?outcome,
            elapsed_ms = duration.as_millis() as u64,
            "job instance finished"
        );
        JobReport {
            id,
            outcome,
            steps,
            duration,
        }
    }

    async fn run_steps(
        &self,
        ctx: &RunnerContext,
        spec: &JobSpec,
        cancel: &mut watch::Receiver<bool>,
    ) -> (InstanceOutcome, Vec<StepReport>) {
        let host = WorkspaceFunctions::new(Arc::clone(&self.fs), ctx.workspace.clone());
        let mut reports = Vec::with_capacity(spec.steps.len());
        let mut pending_saves: Vec<ResolvedCache> = Vec::new();
        let mut outcome = InstanceOutcome::Succeeded;

        for step in &spec.steps {
            let label = interpolate(&step.display_name(), &ctx.expr, &host)
                .unwrap_or_else(|_| step.display_name());

            if outcome == InstanceOutcome::Succeeded && *cancel.borrow() {
                outcome = InstanceOutcome::Cancelled;
            }
            match outcome {
                InstanceOutcome::Succeeded => {}
                InstanceOutcome::Failed => {
                    reports.push(StepReport::new(label, StepStatus::Skipped, ""));
                    continue;
                }
                InstanceOutcome::Cancelled => {
                    reports.push(StepReport::new(label, StepStatus::Cancelled, ""));
                    continue;
                }
            }

            let run = match &step.condition {
                Some(cond) => match cond.evaluate(&ctx.expr, &host) {
                    Ok(true) => self.run_step(step, ctx, &host, cancel, &mut pending_saves).await,
                    Ok(false) => StepRun::new(StepStatus::Skipped, ""),
                    Err(e) => StepRun::failed(step, None, format!("invalid condition: {e}")),
                },
                None => self.run_step(step, ctx, &host, cancel, &mut pending_saves).await,
            };

            match &run.status {
                StepStatus::Failed {
                    continued: false, ..
                } => outcome = InstanceOutcome::Failed,
                StepStatus::Cancelled => outcome = InstanceOutcome::Cancelled,
                _ => {}
            }
            info!(instance = %ctx.id, step = %label, status = %run.status, "step finished");
            reports.push(StepReport::new(label, run.status, run.output));
        }

        if outcome == InstanceOutcome::Succeeded
            && let Some(store) = &self.cache
        {
            for cache in &pending_saves {
                let status = store.save(cache, &ctx.workspace).await;
                info!(instance = %ctx.id, key = %cache.key, ?status, "cache save");
            }
        }

        (outcome, reports)
    }

    async fn run_step(
        &self,
        step: &StepSpec,
        ctx: &RunnerContext,
        host: &WorkspaceFunctions,
        cancel: &mut watch::Receiver<bool>,
        pending_saves: &mut Vec<ResolvedCache>,
    ) -> StepRun {
        let env = match ctx.step_env(step, host) {
            Ok(env) => env,
            Err(e) => return StepRun::failed(step, None, format!("evaluating step env: {e}")),
        };
        let mut expr = ctx.expr.clone();
        expr.env = (*env).clone();

        let invocation = match &step.kind {
            StepKind::Action { reference, with } => {
                let with = match interpolate_map(with, &expr, host) {
                    Ok(with) => with,
                    Err(e) => return StepRun::failed(step, None, e),
                };
                if let Some(action) = CacheAction::from_reference(reference) {
                    return self.restore_cache(action, &with, &expr, ctx, host, pending_saves).await;
                }
                Invocation::Action {
                    reference: reference.clone(),
                    with,
                }
            }
            StepKind::Run { command, shell } => match interpolate(command, &expr, host) {
                Ok(script) => Invocation::Command {
                    script,
                    shell: shell.clone(),
                },
                Err(e) => return StepRun::failed(step, None, format!("evaluating run: {e}")),
            },
        };

        let working_dir = match &step.working_directory {
            Some(dir) => ctx.workspace.join(dir),
            None => ctx.workspace.clone(),
        };
        let request = InvocationRequest {
            invocation,
            env,
            working_dir,
            label: step.display_name(),
        };

        let mut fut = self.invoker.invoke(request, cancel.clone());
        let result = tokio::select! {
            r = &mut fut => r,
            _ = cancelled(cancel) => {
                let grace = self.settings.cancel_grace;
                return match tokio::time::timeout(grace, &mut fut).await {
                    Ok(Ok(out)) => StepRun::new(StepStatus::Cancelled, out.output),
                    Ok(Err(e)) => StepRun::new(StepStatus::Cancelled, format!("{e:#}")),
                    Err(_) => {
                        warn!(instance = %ctx.id, "step ignored cancellation; abandoning it");
                        StepRun::new(StepStatus::Cancelled, "")
                    }
                };
            }
        };

        match result {
            Err(e) => StepRun::failed(step, None, format!("{e:#}")),
            Ok(out) if out.cancelled => StepRun::new(StepStatus::Cancelled, out.output),
            Ok(out) if out.skipped => StepRun::new(StepStatus::Skipped, out.output),
            Ok(out) if out.exit_code == 0 => StepRun::new(StepStatus::Succeeded, out.output),
            Ok(out) => StepRun::failed(step, Some(out.exit_code), out.output),
        }
    }

    /// Restore a cache scope. Never fails the step.
    async fn restore_cache(
        &self,
        action: CacheAction,
        with: &BTreeMap<String, String>,
        expr: &ExprContext,
        ctx: &RunnerContext,
        host: &dyn FunctionHost,
        pending_saves: &mut Vec<ResolvedCache>,
    ) -> StepRun {
        let Some(store) = &self.cache else {
            return StepRun::new(StepStatus::Skipped, "cache disabled");
        };

        let resolved = CacheDeclaration::from_action(action, with)
            .and_then(|decl| decl.resolve(expr, host).map_err(anyhow::Error::from));
        let resolved = match resolved {
            Ok(r) => r,
            Err(e) => {
                warn!(instance = %ctx.id, error = %format!("{e:#}"), "cache step unusable; continuing without cache");
                return StepRun::new(StepStatus::Succeeded, format!("cache unavailable: {e:#}"));
            }
        };

        let outcome = store.restore(&resolved, &ctx.workspace).await;
        let output = match &outcome {
            RestoreOutcome::Hit(key) => format!("cache hit for key {key}"),
            RestoreOutcome::PartialHit(key) => format!("cache restored from key {key}"),
            RestoreOutcome::Miss => format!("cache not found for key {}", resolved.key),
        };
        if !outcome.is_exact_hit() {
            pending_saves.push(resolved);
        }
        StepRun::new(StepStatus::Succeeded, output)
    }
}

fn interpolate_map(
    map: &BTreeMap<String, String>,
    ctx: &ExprContext,
    host: &dyn FunctionHost,
) -> Result<BTreeMap<String, String>, String> {
    map.iter()
        .map(|(k, v)| {
            interpolate(v, ctx, host)
                .map(|v| (k.clone(), v))
                .map_err(|e| format!("evaluating with.{k}: {e}"))
        })
        .collect()
}
