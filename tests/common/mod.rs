#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use cidag::cache::CacheStore;
use cidag::dag::{ScheduledInstance, Scheduler};
use cidag::engine::{CoreRuntime, Runtime};
use cidag::exec::{ActionInvoker, JobRunner, RunnerSettings};
use cidag::fs::RealFileSystem;
use cidag::matrix::{self, JobInstance};
use cidag::run_result::{JobReport, RunResult};
use cidag::trigger::EventDescriptor;
use cidag::workflow::{EventKind, JobSpec, WorkflowDocument};
use cidag_test_utils::fake_executor::{FakeExecutor, FakeProbe};
use cidag_test_utils::with_timeout;

/// Drive a whole run through the real runtime with a fake executor.
pub async fn run_with_fake(
    doc: &WorkflowDocument,
    concurrency: usize,
    configure: impl FnOnce(FakeExecutor) -> FakeExecutor,
) -> (RunResult, FakeProbe) {
    let scheduler =
        Scheduler::new(matrix::expand_all(doc), concurrency, 1).expect("acyclic instance graph");
    let (tx, rx) = mpsc::channel(64);
    let probe = FakeProbe::default();
    let executor = configure(FakeExecutor::new(tx, probe.clone()));

    let runtime = Runtime::new(CoreRuntime::new(scheduler), rx, executor);
    let result = with_timeout(runtime.run()).await.expect("runtime run");
    (result, probe)
}

pub fn settings(work_root: &Path) -> RunnerSettings {
    RunnerSettings {
        work_root: work_root.to_path_buf(),
        cancel_grace: Duration::from_millis(500),
        host_env: BTreeMap::new(),
        workflow_env: BTreeMap::new(),
        event: EventDescriptor::new(EventKind::Push, "main"),
    }
}

pub fn job_runner(
    invoker: Arc<dyn ActionInvoker>,
    cache: Option<CacheStore>,
    settings: RunnerSettings,
) -> JobRunner {
    JobRunner::new(invoker, cache, Arc::new(RealFileSystem), Arc::new(settings))
}

/// The single instance of a job without a matrix.
pub fn scheduled(job: JobSpec) -> ScheduledInstance {
    let instance: JobInstance = matrix::expand(&Arc::new(job))
        .into_iter()
        .next()
        .expect("one instance");
    ScheduledInstance {
        instance,
        run_id: 1,
    }
}

/// Run one instance to completion without cancellation.
pub async fn run_job(runner: &JobRunner, job: JobSpec) -> JobReport {
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    with_timeout(runner.run(scheduled(job), cancel_rx)).await
}
