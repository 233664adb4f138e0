// tests/supersede.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use cidag::aggregate::{GatingPolicy, Verdict};
use cidag::dag::InstanceState;
use cidag::engine::ConcurrencyGroups;
use cidag::matrix::InstanceId;
use cidag::pipeline::{self, Pipeline};
use cidag::trigger::EventDescriptor;
use cidag::workflow::EventKind;
use cidag_test_utils::builders::{JobBuilder, WorkflowBuilder};
use cidag_test_utils::fake_executor::{FakeBehavior, FakeExecutor, FakeProbe};
use cidag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn newer_push_cancels_the_live_run_for_the_same_branch() -> TestResult {
    init_tracing();
    let doc = WorkflowBuilder::new()
        .on(EventKind::PullRequest, &["main"])
        .job(JobBuilder::new("test").run("cargo test"))
        .job(JobBuilder::new("report").needs("test").run("echo report"))
        .build();
    let event = EventDescriptor::new(EventKind::PullRequest, "main");
    let groups = Arc::new(ConcurrencyGroups::new());
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&groups), 4, GatingPolicy::all_jobs()));

    // First run hangs in `test` until cancelled.
    let first_plan = pipeline::plan(&doc, &event, None)?.expect("triggered");
    let first_probe = FakeProbe::default();
    let first = {
        let pipeline = Arc::clone(&pipeline);
        let probe = first_probe.clone();
        tokio::spawn(async move {
            pipeline
                .execute(first_plan, |tx| {
                    FakeExecutor::new(tx, probe).behave("test", FakeBehavior::Hang)
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(groups.live_run(&event.concurrency_key()).is_some());

    let second_plan = pipeline::plan(&doc, &event, None)?.expect("triggered");
    let second_probe = FakeProbe::default();
    let (second_result, second_verdict) = with_timeout(
        pipeline.execute(second_plan, |tx| FakeExecutor::new(tx, second_probe.clone())),
    )
    .await?;

    let (first_result, first_verdict) = with_timeout(first).await??;

    assert_eq!(first_probe.cancelled(), vec![InstanceId::plain("test")]);
    assert_eq!(
        first_result.state_of(&InstanceId::plain("test")),
        Some(InstanceState::Cancelled)
    );
    assert_eq!(
        first_result.state_of(&InstanceId::plain("report")),
        Some(InstanceState::Cancelled)
    );
    assert_eq!(first_verdict.outcome, Verdict::Failure);

    assert_eq!(second_result.count(|s| s == InstanceState::Succeeded), 2);
    assert_eq!(second_verdict.outcome, Verdict::Success);
    assert!(second_result.run_id > first_result.run_id);
    assert_eq!(groups.live_run(&event.concurrency_key()), None);
    Ok(())
}

#[tokio::test]
async fn runs_on_different_branches_do_not_interfere() -> TestResult {
    init_tracing();
    let doc = WorkflowBuilder::new()
        .on(EventKind::Push, &["main", "release/*"])
        .job(JobBuilder::new("build").run("cargo build"))
        .build();
    let groups = Arc::new(ConcurrencyGroups::new());
    let pipeline = Pipeline::new(groups, 2, GatingPolicy::all_jobs());

    let main = pipeline::plan(&doc, &EventDescriptor::new(EventKind::Push, "main"), None)?
        .expect("main triggers");
    let release = pipeline::plan(
        &doc,
        &EventDescriptor::new(EventKind::Push, "release/1.0"),
        None,
    )?
    .expect("release triggers");

    let probe = FakeProbe::default();
    let (a, b) = tokio::join!(
        pipeline.execute(main, |tx| FakeExecutor::new(tx, probe.clone())),
        pipeline.execute(release, |tx| FakeExecutor::new(tx, probe.clone())),
    );
    assert!(a?.1.is_success());
    assert!(b?.1.is_success());
    assert!(probe.cancelled().is_empty());
    Ok(())
}

#[tokio::test]
async fn untriggered_branch_produces_no_plan() -> TestResult {
    let doc = WorkflowBuilder::new()
        .job(JobBuilder::new("build").run("cargo build"))
        .build();
    let plan = pipeline::plan(&doc, &EventDescriptor::new(EventKind::Push, "dev"), None)?;
    assert!(plan.is_none());
    Ok(())
}
