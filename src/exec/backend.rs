// src/exec/backend.rs

//! Pluggable leaf executor abstraction.
//!
//! A task node talks to a `LeafExecutor` instead of to a task directly.
//! This keeps where a leaf actually runs (this thread, a pool worker, a
//! child process) out of the pipeline code, and lets tests drive nodes with
//! an in-process executor.
//!
//! - [`InProcessRunner`](super::in_process::InProcessRunner) runs the task
//!   on the caller's runtime.
//! - [`PooledExecutor`](super::pool::PooledExecutor) dispatches to a worker
//!   thread of the shared pool.
//! - [`ProcessExecutor`](super::process::ProcessExecutor) drives a child
//!   process over the line protocol.

use crate::errors::Result;
use crate::exec::runnable::Updater;
use crate::pipeline::events::TaskEvent;
use crate::types::{BoxFuture, ChangeSet};

pub trait LeafExecutor: Send + Sync {
    /// Run the leaf once and resolve with its terminal event
    /// (`Result`, `Error` or `Stop`). Updates go through `update`.
    fn run(&self, changes: ChangeSet, update: Updater) -> BoxFuture<'_, TaskEvent>;

    /// Ask the in-flight run to stop and wait until it has. A no-op when
    /// nothing is running. Fails with `TaskTerminationTimeout` when neither
    /// acknowledgement nor settlement arrives in time.
    fn stop(&self) -> BoxFuture<'_, Result<()>>;

    /// Release long-lived resources (e.g. a persistent child process).
    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
