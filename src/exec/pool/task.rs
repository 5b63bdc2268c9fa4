// src/exec/pool/task.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, info_span, warn};

use crate::errors::{ErrorInfo, Result, WatchpipeError};
use crate::exec::backend::LeafExecutor;
use crate::exec::gate::RunGate;
use crate::exec::pool::WorkerPool;
use crate::exec::runnable::{RunnableTask, Updater};
use crate::pipeline::events::TaskEvent;
use crate::types::{BoxFuture, ChangeSet, TaskName};

/// Control messages from a proxy to the worker running its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PortDirective {
    Stop,
}

/// Messages from a worker back to the proxy.
#[derive(Debug, Clone)]
pub(crate) enum WorkerEvent {
    Update(String),
    Terminal(TaskEvent),
}

/// The worker's half of the duplex channel to a proxy.
pub(crate) struct TaskPort {
    pub(crate) directives: mpsc::UnboundedReceiver<PortDirective>,
    pub(crate) events: mpsc::UnboundedSender<WorkerEvent>,
}

/// One unit of work for the pool.
pub struct WorkerTask {
    pub(crate) name: TaskName,
    pub(crate) runnable: Arc<dyn RunnableTask>,
    pub(crate) changes: ChangeSet,
    pub(crate) options: Arc<Value>,
    pub(crate) stop_timeout: Duration,
    pub(crate) port: TaskPort,
}

impl WorkerTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn events(&self) -> mpsc::UnboundedSender<WorkerEvent> {
        self.port.events.clone()
    }

    /// Settle this task with an error without it ever reaching a worker.
    pub(crate) fn reject(self, reason: &str) {
        let error = WatchpipeError::UnexpectedTaskTermination {
            task: self.name.clone(),
            reason: reason.to_string(),
        };
        let _ = self
            .port
            .events
            .send(WorkerEvent::Terminal(TaskEvent::Error(ErrorInfo::from(error))));
    }
}

/// Proxy executor for `fork = false` tasks: every run is shipped to a pool
/// worker thread, with updates and the terminal event relayed back.
pub struct PooledExecutor {
    name: TaskName,
    runnable: Arc<dyn RunnableTask>,
    options: Arc<Value>,
    stop_timeout: Duration,
    pool: WorkerPool,
    control: Mutex<Option<mpsc::UnboundedSender<PortDirective>>>,
    stop_requested: AtomicBool,
    gate: RunGate,
    span: Span,
}

impl PooledExecutor {
    pub fn new(
        name: impl Into<TaskName>,
        runnable: Arc<dyn RunnableTask>,
        options: Value,
        stop_timeout: Duration,
        pool: WorkerPool,
    ) -> Self {
        let name = name.into();
        let span = info_span!("pooled", task = %name);
        Self {
            name,
            runnable,
            options: Arc::new(options),
            stop_timeout,
            pool,
            control: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            gate: RunGate::new(),
            span,
        }
    }

    fn control(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<PortDirective>>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_once(&self, changes: ChangeSet, update: Updater) -> TaskEvent {
        self.stop_requested.store(false, Ordering::SeqCst);
        let _settle = self.gate.begin();

        let (directive_tx, directive_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let dispatched = {
            let mut control = self.control();
            if self.stop_requested.load(Ordering::SeqCst) {
                false
            } else {
                *control = Some(directive_tx);
                true
            }
        };

        let event = if dispatched {
            self.pool.run_task(WorkerTask {
                name: self.name.clone(),
                runnable: Arc::clone(&self.runnable),
                changes,
                options: Arc::clone(&self.options),
                stop_timeout: self.stop_timeout,
                port: TaskPort {
                    directives: directive_rx,
                    events: event_tx,
                },
            });

            loop {
                match event_rx.recv().await {
                    Some(WorkerEvent::Update(message)) => update.update(message),
                    Some(WorkerEvent::Terminal(event)) => break event,
                    None => {
                        break TaskEvent::Error(
                            WatchpipeError::UnexpectedTaskTermination {
                                task: self.name.clone(),
                                reason: "worker dropped the task".to_string(),
                            }
                            .into(),
                        );
                    }
                }
            }
        } else {
            debug!("stopped before dispatch");
            TaskEvent::Stop
        };

        *self.control() = None;
        event
    }

    async fn stop_once(&self) -> Result<()> {
        if !self.gate.is_running() {
            return Ok(());
        }
        {
            let control = self.control();
            self.stop_requested.store(true, Ordering::SeqCst);
            if let Some(tx) = control.as_ref() {
                let _ = tx.send(PortDirective::Stop);
            }
        }

        self.gate.wait_settled(self.stop_timeout).await.map_err(|_| {
            warn!(timeout = ?self.stop_timeout, "pooled task did not stop in time");
            WatchpipeError::TaskTerminationTimeout {
                task: self.name.clone(),
                timeout: self.stop_timeout,
            }
        })
    }
}

impl LeafExecutor for PooledExecutor {
    fn run(&self, changes: ChangeSet, update: Updater) -> BoxFuture<'_, TaskEvent> {
        Box::pin(self.run_once(changes, update).instrument(self.span.clone()))
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.stop_once().instrument(self.span.clone()))
    }
}
