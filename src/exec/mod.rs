// src/exec/mod.rs

//! Execution layer.
//!
//! - [`backend`] provides the `ExecutorBackend` trait the runtime talks to,
//!   and `RealExecutorBackend`, which forwards to the executor loop.
//! - [`executor_loop`] owns the in-flight instances and their cancel handles.
//! - [`job_runner`] is the step executor: it runs one instance's steps in
//!   order inside its runner context.
//! - [`workspace`] creates and tears down runner contexts.
//! - [`invoker`] is the boundary to external commands and actions.

pub mod backend;
pub mod executor_loop;
pub mod invoker;
pub mod job_runner;
pub mod workspace;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::spawn_executor;
pub use invoker::{
    ActionInvoker, Invocation, InvocationOutput, InvocationRequest, LocalInvoker,
};
pub use job_runner::JobRunner;
pub use workspace::{RunnerContext, RunnerSettings};

use tokio::sync::watch;

/// Resolve once `rx` carries `true`. Never resolves if the sender goes away
/// without cancelling.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
