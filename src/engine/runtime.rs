// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dag::ScheduledInstance;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::matrix::InstanceId;
use crate::run_result::RunResult;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives the scheduler in response to `RuntimeEvent`s and delegates
/// execution to an `ExecutorBackend`.
///
/// All run semantics live in `CoreRuntime`; this shell only moves events and
/// commands. It blocks on the event channel between completions, so waiting
/// dependents cost nothing.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
        }
    }

    /// Main event loop. Returns the run's final state once every instance is
    /// terminal (or on shutdown / channel close).
    pub async fn run(mut self) -> Result<RunResult> {
        let run_id = self.core.scheduler().run_id();
        info!(run_id, "runtime started");

        let step = self.core.start();
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!(run_id, "runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                keep_running = false;
            }
        }

        info!(run_id, "runtime exiting");
        Ok(self.core.into_result())
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchInstances(instances) => self.spawn_ready(instances).await,
            CoreCommand::CancelInstances(ids) => self.cancel(ids).await,
            CoreCommand::Finish => {
                debug!("core reports all instances terminal");
                Ok(())
            }
        }
    }

    async fn spawn_ready(&mut self, instances: Vec<ScheduledInstance>) -> Result<()> {
        if instances.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = instances.iter().map(|s| s.id().to_string()).collect();
        debug!(?ids, "dispatching ready instances");
        self.executor.spawn_ready(instances).await
    }

    async fn cancel(&mut self, ids: Vec<InstanceId>) -> Result<()> {
        let names: Vec<String> = ids.iter().map(ToString::to_string).collect();
        debug!(?names, "cancelling in-flight instances");
        self.executor.cancel(ids).await
    }
}
