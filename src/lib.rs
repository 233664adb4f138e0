// src/lib.rs

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod expr;
pub mod fs;
pub mod logging;
pub mod matrix;
pub mod pipeline;
pub mod report;
pub mod run_result;
pub mod trigger;
pub mod types;
pub mod workflow;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cache::{backend_from_config, CacheStore};
use crate::cli::CliArgs;
use crate::config::{load_or_default, ConfigFile};
use crate::engine::{ConcurrencyGroups, RuntimeEvent};
use crate::errors::{CidagError, Result};
use crate::exec::{JobRunner, LocalInvoker, RealExecutorBackend, RunnerSettings};
use crate::fs::{FileSystem, RealFileSystem};
use crate::pipeline::{condition_context, Pipeline};
use crate::trigger::EventDescriptor;
use crate::workflow::LoadOptions;

/// High-level entry point used by `main.rs`. Returns whether the run passed.
///
/// This wires together:
/// - engine config and workflow loading
/// - trigger evaluation, matrix expansion and planning
/// - cache store, action invoker and executor
/// - Ctrl-C handling (cancels the run cooperatively)
/// - the run summary
pub async fn run(args: CliArgs) -> Result<bool> {
    let cfg = load_or_default(&args.config)?;
    let strict = args.strict || cfg.engine.strict;
    let doc = workflow::load_from_path(&args.workflow, LoadOptions { strict })?;

    let event = EventDescriptor::new(args.event.into(), args.branch.clone());
    let concurrency = args.concurrency.unwrap_or(cfg.engine.concurrency);
    if concurrency == 0 {
        return Err(CidagError::ConfigError(
            "--concurrency must be >= 1 (got 0)".to_string(),
        ));
    }

    let source_dir = std::env::current_dir()?;
    let settings = runner_settings(&cfg, &doc, &event, &source_dir);
    let plan = pipeline::plan(&doc, &event, args.job.as_deref())?;

    if args.dry_run {
        let ctx = condition_context(&settings);
        print!("{}", pipeline::render_dry_run(&doc, &event, plan.as_ref(), &ctx));
        return Ok(true);
    }

    let Some(plan) = plan else {
        info!("nothing to run");
        return Ok(true);
    };

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let cache = cfg.cache.enabled.then(|| {
        let dir = resolve(&source_dir, &cfg.cache.dir);
        CacheStore::new(backend_from_config(cfg.cache.backend, &dir), Arc::clone(&fs))
    });
    let invoker = Arc::new(LocalInvoker::new(
        source_dir.clone(),
        cfg.actions.clone(),
        cfg.engine.unknown_actions,
        cfg.engine.cancel_grace,
    ));

    let ctx = condition_context(&settings);
    let runner = Arc::new(JobRunner::new(invoker, cache, fs, Arc::new(settings)));
    let pipeline = Pipeline::new(
        Arc::new(ConcurrencyGroups::new()),
        concurrency,
        cfg.gating.clone(),
    )
    .with_context(ctx);

    let backend_runner = Arc::clone(&runner);
    let (result, verdict) = pipeline
        .execute(plan, |tx| {
            spawn_ctrl_c_handler(tx.clone());
            RealExecutorBackend::new(tx, backend_runner)
        })
        .await?;
    runner.settings().remove_run_dir(result.run_id).await;

    report::print_summary(&result, &verdict, args.color);
    Ok(verdict.is_success())
}

/// Run-wide settings from config, workflow and the host environment.
fn runner_settings(
    cfg: &ConfigFile,
    doc: &workflow::WorkflowDocument,
    event: &EventDescriptor,
    source_dir: &Path,
) -> RunnerSettings {
    RunnerSettings {
        work_root: resolve(source_dir, &cfg.engine.work_dir),
        cancel_grace: cfg.engine.cancel_grace,
        host_env: host_env(cfg, |name| std::env::var(name).ok()),
        workflow_env: doc.env().clone(),
        event: event.clone(),
    }
}

/// Passthrough variables present on the host, then `[env]` on top.
fn host_env(cfg: &ConfigFile, lookup: impl Fn(&str) -> Option<String>) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = cfg
        .engine
        .passthrough_env
        .iter()
        .filter_map(|name| lookup(name).map(|value| (name.clone(), value)))
        .collect();
    env.extend(cfg.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Ctrl-C → cooperative cancellation of the current run.
fn spawn_ctrl_c_handler(tx: mpsc::Sender<RuntimeEvent>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        let _ = tx
            .send(RuntimeEvent::CancelRequested {
                reason: "interrupted".to_string(),
            })
            .await;
    });
}
