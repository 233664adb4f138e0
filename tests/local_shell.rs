// tests/local_shell.rs

#![cfg(unix)]

mod common;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use cidag::dag::InstanceOutcome;
use cidag::exec::{JobRunner, LocalInvoker};
use cidag::run_result::StepStatus;
use cidag::types::UnknownActionPolicy;
use cidag::workflow::JobSpec;
use cidag_test_utils::builders::{JobBuilder, StepBuilder};
use cidag_test_utils::{init_tracing, with_timeout};

use common::{job_runner, run_job, scheduled, settings};

fn local_runner(source: &Path, work: &Path, host_env: &[(&str, &str)]) -> JobRunner {
    let invoker = LocalInvoker::new(
        source,
        BTreeMap::new(),
        UnknownActionPolicy::Skip,
        Duration::from_millis(200),
    );
    let mut s = settings(work);
    s.cancel_grace = Duration::from_millis(200);
    s.host_env = host_env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    job_runner(Arc::new(invoker), None, s)
}

fn copyright_job() -> JobSpec {
    JobBuilder::new("copyright")
        .step(StepBuilder::uses("actions/checkout@v4").name("Checkout"))
        .step(
            StepBuilder::run("grep -q 'Copyright (c)' LICENSE")
                .name("Check copyright notice"),
        )
        .build()
}

#[tokio::test]
async fn copyright_job_succeeds_when_notice_present() {
    init_tracing();
    let source = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    fs::write(
        source.path().join("LICENSE"),
        "MIT License\n\nCopyright (c) 2024 The Authors\n",
    )
    .unwrap();

    let runner = local_runner(source.path(), work.path(), &[]);
    let report = run_job(&runner, copyright_job()).await;

    assert_eq!(report.outcome, InstanceOutcome::Succeeded);
    assert_eq!(report.step("Checkout").unwrap().status, StepStatus::Succeeded);
}

#[tokio::test]
async fn copyright_job_fails_when_notice_missing() {
    init_tracing();
    let source = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    fs::write(source.path().join("LICENSE"), "MIT License\n").unwrap();

    let runner = local_runner(source.path(), work.path(), &[]);
    let report = run_job(&runner, copyright_job()).await;

    assert_eq!(report.outcome, InstanceOutcome::Failed);
    assert_eq!(
        report.step("Check copyright notice").unwrap().status,
        StepStatus::Failed {
            exit_code: Some(1),
            continued: false,
        }
    );
}

#[tokio::test]
async fn continue_on_error_with_real_exit_code() {
    init_tracing();
    let source = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let runner = local_runner(source.path(), work.path(), &[]);

    let job = JobBuilder::new("j")
        .step(StepBuilder::run("exit 3").name("Flaky").continue_on_error())
        .step(StepBuilder::run("echo done").name("After"))
        .build();
    let report = run_job(&runner, job).await;

    assert_eq!(report.outcome, InstanceOutcome::Succeeded);
    assert_eq!(
        report.step("Flaky").unwrap().status,
        StepStatus::Failed {
            exit_code: Some(3),
            continued: true,
        }
    );
    assert!(report.step("After").unwrap().output.contains("done"));
}

#[tokio::test]
async fn passthrough_variables_reach_steps_verbatim() {
    init_tracing();
    let source = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let runner = local_runner(
        source.path(),
        work.path(),
        &[("CARGO_TERM_COLOR", "always"), ("RUSTFLAGS", "-Dwarnings")],
    );

    let job = JobBuilder::new("env")
        .step(
            StepBuilder::run(
                "test \"$CARGO_TERM_COLOR\" = always && test \"$RUSTFLAGS\" = -Dwarnings",
            )
            .name("Check env"),
        )
        .build();
    let report = run_job(&runner, job).await;

    assert_eq!(report.outcome, InstanceOutcome::Succeeded);
}

#[tokio::test]
async fn cancelled_process_is_killed_and_workspace_removed() {
    init_tracing();
    let source = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let runner = local_runner(source.path(), work.path(), &[]);
    let workspace = work.path().join("run-1").join("slow");

    let job = JobBuilder::new("slow")
        .step(StepBuilder::run("sleep 30").name("Sleep"))
        .build();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let sched = scheduled(job);
    let handle = tokio::spawn(async move { runner.run(sched, cancel_rx).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = Instant::now();
    cancel_tx.send(true).unwrap();
    let report = with_timeout(handle).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.outcome, InstanceOutcome::Cancelled);
    assert_eq!(report.step("Sleep").unwrap().status, StepStatus::Cancelled);
    assert!(!workspace.exists());
}
