// src/exec/workspace.rs

//! Runner contexts: one workspace directory and one immutable environment
//! snapshot per job instance.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::cache::WorkspaceFunctions;
use crate::dag::ScheduledInstance;
use crate::expr::{interpolate, ExprContext, ExprError, FunctionHost};
use crate::fs::FileSystem;
use crate::matrix::InstanceId;
use crate::trigger::EventDescriptor;
use crate::workflow::StepSpec;

/// Run-wide inputs shared by every runner context.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Parent of every workspace (`<work_root>/run-<id>/<instance>`).
    pub work_root: PathBuf,
    pub cancel_grace: Duration,
    /// Passthrough host variables and `[env]`, copied verbatim.
    pub host_env: BTreeMap<String, String>,
    /// Workflow-level `env:` (may contain expressions).
    pub workflow_env: BTreeMap<String, String>,
    pub event: EventDescriptor,
}

impl RunnerSettings {
    /// Parent directory of every workspace of one run.
    pub fn run_dir(&self, run_id: u64) -> PathBuf {
        self.work_root.join(format!("run-{run_id}"))
    }

    /// Remove a finished run's directory. Errors are logged, not returned.
    pub async fn remove_run_dir(&self, run_id: u64) {
        let dir = self.run_dir(run_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(run_id, dir = ?dir, "run directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(run_id, error = %e, "failed to remove run directory"),
        }
    }

    /// Expression context for this run, before any job is bound.
    pub fn base_context(&self) -> ExprContext {
        ExprContext {
            event_name: self.event.kind.to_string(),
            ref_name: self.event.branch.clone(),
            ..ExprContext::for_host()
        }
    }
}

/// An isolated execution environment assigned to one job instance.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    pub id: InstanceId,
    pub run_id: u64,
    pub workspace: PathBuf,
    /// Environment snapshot shared by every step of the instance.
    pub env: Arc<BTreeMap<String, String>>,
    /// Expression context with `matrix`, `env` and `runner` bound.
    pub expr: ExprContext,
}

impl RunnerContext {
    /// Create the workspace directory and compute the env snapshot.
    ///
    /// Layering, later wins: built-in CI variables, host passthrough and
    /// `[env]`, workflow `env`, job `env`.
    pub async fn create(
        settings: &RunnerSettings,
        scheduled: &ScheduledInstance,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let instance = &scheduled.instance;
        let workspace = settings.run_dir(scheduled.run_id).join(instance.id.slug());

        if tokio::fs::try_exists(&workspace).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&workspace)
                .await
                .with_context(|| format!("clearing stale workspace {:?}", workspace))?;
        }
        tokio::fs::create_dir_all(&workspace)
            .await
            .with_context(|| format!("creating workspace {:?}", workspace))?;

        let (env, expr) = match bind_env(settings, scheduled, &workspace, fs) {
            Ok(bound) => bound,
            Err(e) => {
                remove_dir(&workspace, &instance.id).await;
                return Err(e);
            }
        };

        debug!(instance = %instance.id, workspace = ?workspace, vars = env.len(), "runner context ready");
        Ok(Self {
            id: instance.id.clone(),
            run_id: scheduled.run_id,
            workspace,
            env: Arc::new(env),
            expr,
        })
    }

    /// Snapshot plus the step's own `env:`. The snapshot is never modified.
    pub fn step_env(
        &self,
        step: &StepSpec,
        host: &dyn FunctionHost,
    ) -> Result<Arc<BTreeMap<String, String>>, ExprError> {
        if step.env.is_empty() {
            return Ok(Arc::clone(&self.env));
        }
        let mut env = (*self.env).clone();
        for (key, template) in &step.env {
            let value = interpolate(template, &self.expr, host)?;
            env.insert(key.clone(), value);
        }
        Ok(Arc::new(env))
    }

    /// Remove the workspace. Errors are logged, not returned.
    pub async fn teardown(&self) {
        remove_dir(&self.workspace, &self.id).await;
    }
}

/// Built-in CI variables, then host passthrough and `[env]`, then the
/// workflow and job `env:` layers, each interpolated over what came before.
fn bind_env(
    settings: &RunnerSettings,
    scheduled: &ScheduledInstance,
    workspace: &Path,
    fs: Arc<dyn FileSystem>,
) -> Result<(BTreeMap<String, String>, ExprContext)> {
    let instance = &scheduled.instance;
    let mut expr = settings.base_context();
    expr.matrix = instance.matrix.clone();

    let mut env = BTreeMap::new();
    env.insert("CI".to_string(), "true".to_string());
    env.insert("GITHUB_ACTIONS".to_string(), "false".to_string());
    env.insert("GITHUB_WORKSPACE".to_string(), workspace.display().to_string());
    env.insert("GITHUB_EVENT_NAME".to_string(), expr.event_name.clone());
    env.insert("GITHUB_REF_NAME".to_string(), expr.ref_name.clone());
    env.insert("GITHUB_JOB".to_string(), instance.spec.name.clone());
    env.insert("RUNNER_OS".to_string(), expr.runner_os.clone());
    env.insert("RUNNER_ARCH".to_string(), expr.runner_arch.clone());
    env.extend(settings.host_env.clone());

    let host = WorkspaceFunctions::new(fs, workspace.to_path_buf());
    for layer in [&settings.workflow_env, &instance.spec.env] {
        expr.env = env.clone();
        for (key, template) in layer {
            let value = interpolate(template, &expr, &host)
                .with_context(|| format!("evaluating env `{key}`"))?;
            env.insert(key.clone(), value);
        }
    }
    expr.env = env.clone();
    Ok((env, expr))
}

async fn remove_dir(path: &Path, id: &InstanceId) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(instance = %id, "workspace removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(instance = %id, error = %e, "failed to remove workspace"),
    }
}
