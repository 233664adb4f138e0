// src/exec/executor_loop.rs

//! Executor loop that owns in-flight job instances.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn, Instrument};

use crate::dag::ScheduledInstance;
use crate::engine::RuntimeEvent;
use crate::exec::job_runner::JobRunner;
use crate::logging::instance_span;
use crate::matrix::InstanceId;

/// Messages accepted by the executor loop.
#[derive(Debug)]
pub enum ExecutorMessage {
    Run(ScheduledInstance),
    Cancel(Vec<InstanceId>),
}

/// Internal handle for a running instance.
///
/// - `cancel` flips to `true` to request a cooperative stop.
/// - `handle` is the Tokio task running the instance's steps.
struct ActiveInstance {
    cancel: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Each instance runs in its own Tokio task and reports back through
/// `RuntimeEvent::InstanceCompleted`, cancelled or not, so the scheduler
/// always sees a terminal state.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    runner: Arc<JobRunner>,
) -> mpsc::Sender<ExecutorMessage> {
    let (tx, mut rx) = mpsc::channel::<ExecutorMessage>(32);

    tokio::spawn(async move {
        info!("executor loop started");
        let mut active: HashMap<InstanceId, ActiveInstance> = HashMap::new();

        while let Some(message) = rx.recv().await {
            active.retain(|_, a| !a.handle.is_finished());
            match message {
                ExecutorMessage::Run(scheduled) => {
                    start_instance(scheduled, &mut active, &runtime_tx, &runner)
                }
                ExecutorMessage::Cancel(ids) => cancel_instances(&ids, &active),
            }
        }

        // Channel closed: stop whatever is still running.
        for (id, instance) in active.drain() {
            debug!(instance = %id, "executor shutting down; cancelling instance");
            let _ = instance.cancel.send(true);
        }
        info!("executor loop finished (channel closed)");
    });

    tx
}

fn start_instance(
    scheduled: ScheduledInstance,
    active: &mut HashMap<InstanceId, ActiveInstance>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    runner: &Arc<JobRunner>,
) {
    let id = scheduled.id().clone();
    if active.contains_key(&id) {
        warn!(instance = %id, "instance already running; ignoring duplicate dispatch");
        return;
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let rt_tx = runtime_tx.clone();
    let runner = Arc::clone(runner);
    let spawn_id = id.clone();
    let span = instance_span(&scheduled);

    let handle = tokio::spawn(
        async move {
            let report = runner.run(scheduled, cancel_rx).await;
            if rt_tx
                .send(RuntimeEvent::InstanceCompleted { report })
                .await
                .is_err()
            {
                debug!(instance = %spawn_id, "runtime gone; dropping completion report");
            }
        }
        .instrument(span),
    );

    active.insert(
        id,
        ActiveInstance {
            cancel: cancel_tx,
            handle,
        },
    );
}

fn cancel_instances(ids: &[InstanceId], active: &HashMap<InstanceId, ActiveInstance>) {
    for id in ids {
        match active.get(id) {
            Some(instance) => {
                info!(instance = %id, "cancelling running instance");
                if instance.cancel.send(true).is_err() {
                    debug!(instance = %id, "instance already finished while cancelling");
                }
            }
            None => debug!(instance = %id, "cancel for instance that is not running"),
        }
    }
}
