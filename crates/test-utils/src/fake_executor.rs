use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use cidag::dag::{InstanceOutcome, ScheduledInstance};
use cidag::engine::RuntimeEvent;
use cidag::errors::Result;
use cidag::exec::ExecutorBackend;
use cidag::matrix::InstanceId;
use cidag::run_result::JobReport;

/// How a fake job behaves once dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    Succeed,
    Fail,
    /// Never completes on its own; reports `Cancelled` when cancelled.
    Hang,
}

/// What the fake executor observed.
#[derive(Debug, Default)]
pub struct ProbeState {
    pub dispatched: Vec<InstanceId>,
    pub cancelled: Vec<InstanceId>,
    pub running: usize,
    pub max_running: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeProbe(Arc<Mutex<ProbeState>>);

impl FakeProbe {
    pub fn dispatched(&self) -> Vec<InstanceId> {
        self.0.lock().unwrap().dispatched.clone()
    }

    pub fn dispatched_jobs(&self) -> Vec<String> {
        self.dispatched().into_iter().map(|id| id.job).collect()
    }

    pub fn cancelled(&self) -> Vec<InstanceId> {
        self.0.lock().unwrap().cancelled.clone()
    }

    pub fn max_running(&self) -> usize {
        self.0.lock().unwrap().max_running
    }

    fn start(&self, id: InstanceId) {
        let mut s = self.0.lock().unwrap();
        s.dispatched.push(id);
        s.running += 1;
        s.max_running = s.max_running.max(s.running);
    }

    fn finish(&self) {
        let mut s = self.0.lock().unwrap();
        s.running = s.running.saturating_sub(1);
    }
}

/// A fake executor that:
/// - records which instances were dispatched and how many overlapped
/// - reports a scripted outcome per job after `delay`
/// - holds `Hang` instances until they are cancelled.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    script: HashMap<String, FakeBehavior>,
    delay: Duration,
    probe: FakeProbe,
    hanging: Arc<Mutex<HashSet<InstanceId>>>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, probe: FakeProbe) -> Self {
        Self {
            runtime_tx,
            script: HashMap::new(),
            delay: Duration::from_millis(10),
            probe,
            hanging: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn behave(mut self, job: &str, behavior: FakeBehavior) -> Self {
        self.script.insert(job.to_string(), behavior);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

fn completed(id: InstanceId, outcome: InstanceOutcome) -> RuntimeEvent {
    RuntimeEvent::InstanceCompleted {
        report: JobReport {
            id,
            outcome,
            steps: vec![],
            duration: Duration::ZERO,
        },
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for scheduled in instances {
                let id = scheduled.id().clone();
                self.probe.start(id.clone());

                let behavior = self
                    .script
                    .get(&id.job)
                    .copied()
                    .unwrap_or(FakeBehavior::Succeed);
                let outcome = match behavior {
                    FakeBehavior::Hang => {
                        self.hanging.lock().unwrap().insert(id);
                        continue;
                    }
                    FakeBehavior::Succeed => InstanceOutcome::Succeeded,
                    FakeBehavior::Fail => InstanceOutcome::Failed,
                };

                let tx = self.runtime_tx.clone();
                let probe = self.probe.clone();
                let delay = self.delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    probe.finish();
                    let _ = tx.send(completed(id, outcome)).await;
                });
            }
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        ids: Vec<InstanceId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for id in ids {
                let was_hanging = self.hanging.lock().unwrap().remove(&id);
                if !was_hanging {
                    continue;
                }
                self.probe.finish();
                self.probe.0.lock().unwrap().cancelled.push(id.clone());
                self.runtime_tx
                    .send(completed(id, InstanceOutcome::Cancelled))
                    .await
                    .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
