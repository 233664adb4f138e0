// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender,
//! so tests can swap in a fake executor that reports scripted outcomes.
//!
//! - `RealExecutorBackend` wraps the `spawn_executor` loop and forwards
//!   scheduled instances and cancellations over an mpsc channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::dag::ScheduledInstance;
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};
use crate::matrix::InstanceId;

use super::executor_loop::{spawn_executor, ExecutorMessage};
use super::job_runner::JobRunner;

/// Trait abstracting how scheduled instances are executed.
///
/// Every dispatched instance must eventually produce exactly one
/// `RuntimeEvent::InstanceCompleted`, including after `cancel`.
pub trait ExecutorBackend: Send {
    /// Dispatch the given instances for execution.
    fn spawn_ready(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask running instances to stop.
    fn cancel(
        &mut self,
        ids: Vec<InstanceId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorMessage>,
}

impl RealExecutorBackend {
    /// Spawn the background executor loop wired to `runtime_tx`.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, runner: Arc<JobRunner>) -> Self {
        let tx = spawn_executor(runtime_tx, runner);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();
        Box::pin(async move {
            for instance in instances {
                tx.send(ExecutorMessage::Run(instance))
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        ids: Vec<InstanceId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send(ExecutorMessage::Cancel(ids))
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }
}
