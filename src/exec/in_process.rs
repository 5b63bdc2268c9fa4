// src/exec/in_process.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{Instrument, Span, debug, info_span, warn};

use crate::errors::{ErrorInfo, Result, WatchpipeError};
use crate::exec::backend::LeafExecutor;
use crate::exec::gate::RunGate;
use crate::exec::runnable::{RunnableTask, Updater};
use crate::pipeline::events::TaskEvent;
use crate::types::{BoxFuture, ChangeSet, TaskName};

/// Runs a [`RunnableTask`] directly on the calling runtime.
///
/// This is also the engine inside pool workers and inside child processes
/// served by [`crate::exec::child::serve`].
pub struct InProcessRunner {
    name: TaskName,
    task: Arc<dyn RunnableTask>,
    options: Arc<Value>,
    stop_timeout: Duration,
    gate: RunGate,
    stop_requested: AtomicBool,
    span: Span,
}

impl InProcessRunner {
    pub fn new(
        name: impl Into<TaskName>,
        task: Arc<dyn RunnableTask>,
        options: Arc<Value>,
        stop_timeout: Duration,
    ) -> Self {
        let name = name.into();
        let span = info_span!("in_process", task = %name);
        Self {
            name,
            task,
            options,
            stop_timeout,
            gate: RunGate::new(),
            stop_requested: AtomicBool::new(false),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run_once(&self, changes: ChangeSet, update: Updater) -> TaskEvent {
        self.stop_requested.store(false, Ordering::SeqCst);
        let _settle = self.gate.begin();

        let outcome = self.task.run(&changes, update, &self.options).await;

        // A stop request wins over whatever the leaf returned.
        let event = if self.stop_requested.load(Ordering::SeqCst) {
            TaskEvent::Stop
        } else {
            match outcome {
                Ok(report) => TaskEvent::Result(report.unwrap_or_default()),
                Err(err) => {
                    debug!(error = %format!("{err:#}"), "leaf run failed");
                    TaskEvent::Error(ErrorInfo::from_anyhow(&err))
                }
            }
        };

        event
    }

    async fn stop_once(&self) -> Result<()> {
        if !self.gate.is_running() {
            return Ok(());
        }
        self.stop_requested.store(true, Ordering::SeqCst);

        // Either the leaf's own stop() resolving or the run settling counts.
        let acknowledged = self.task.stop();
        let settled = self.gate.wait_settled(self.stop_timeout);
        tokio::select! {
            _ = acknowledged => Ok(()),
            res = settled => res.map_err(|_| {
                warn!(timeout = ?self.stop_timeout, "task did not stop in time");
                WatchpipeError::TaskTerminationTimeout {
                    task: self.name.clone(),
                    timeout: self.stop_timeout,
                }
            }),
        }
    }
}

impl LeafExecutor for InProcessRunner {
    fn run(&self, changes: ChangeSet, update: Updater) -> BoxFuture<'_, TaskEvent> {
        Box::pin(self.run_once(changes, update).instrument(self.span.clone()))
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.stop_once().instrument(self.span.clone()))
    }
}
