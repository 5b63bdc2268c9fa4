// src/pipeline/task_node.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::config::model::TaskOptions;
use crate::errors::{Result, WatchpipeError};
use crate::exec::backend::LeafExecutor;
use crate::exec::loader::resolve_executable;
use crate::exec::pool::PooledExecutor;
use crate::exec::process::{ProcessExecutor, ProcessSpec};
use crate::exec::runnable::Updater;
use crate::pipeline::BuildContext;
use crate::pipeline::events::{EventSink, PipelineEvent, TaskEvent};
use crate::types::{ChangeSet, TaskName};
use crate::watch::patterns::PathFilter;

/// A leaf of the pipeline: path filtering in front of a [`LeafExecutor`].
pub struct TaskNode {
    name: TaskName,
    filter: PathFilter,
    executor: Arc<dyn LeafExecutor>,
    in_flight: AtomicBool,
    span: Span,
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight flag even if the run future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl TaskNode {
    pub fn new(name: impl Into<TaskName>, filter: PathFilter, executor: Arc<dyn LeafExecutor>) -> Self {
        let name = name.into();
        let span = info_span!("task", task = %name);
        Self {
            name,
            filter,
            executor,
            in_flight: AtomicBool::new(false),
            span,
        }
    }

    /// Build a node from configuration: forked tasks get a process
    /// executor, everything else runs on the worker pool.
    pub fn from_options(options: &TaskOptions, ctx: &BuildContext<'_>) -> Result<Self> {
        let name = options.display_name();
        let filter = PathFilter::new(options.include.as_deref(), options.exclude.as_deref())
            .map_err(|e| WatchpipeError::ConfigError(format!("task '{name}': {e:#}")))?;

        let executor: Arc<dyn LeafExecutor> = if options.fork {
            let program = resolve_executable(&options.module, ctx.root)?;
            Arc::new(ProcessExecutor::new(
                name.clone(),
                ProcessSpec {
                    program,
                    args: options.args.clone(),
                    cwd: Some(ctx.root.to_path_buf()),
                    options: options.options.clone(),
                    persistent: options.persistent,
                    stop_timeout: options.effective_stop_timeout(),
                    exit_timeout: options.effective_exit_timeout(),
                },
            ))
        } else {
            let runnable = ctx.loader.load(&options.module, &options.options)?;
            Arc::new(PooledExecutor::new(
                name.clone(),
                runnable,
                options.options.clone(),
                options.effective_stop_timeout(),
                ctx.pool.clone(),
            ))
        };

        debug!(task = %name, module = %options.module, fork = options.fork, "task node built");
        Ok(Self::new(name, filter, executor))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run once against `changes` and return the terminal event. Every
    /// event, updates included, is also published on `sink`.
    ///
    /// When no path in any bucket passes the filter, the leaf is not
    /// invoked and the run ends as `Skipped`.
    pub async fn run(&self, changes: &ChangeSet, sink: &EventSink) -> TaskEvent {
        self.run_inner(changes, sink)
            .instrument(self.span.clone())
            .await
    }

    async fn run_inner(&self, changes: &ChangeSet, sink: &EventSink) -> TaskEvent {
        let filtered = self.filter.apply(changes);
        if filtered.is_empty() {
            debug!("no matching changes; skipping");
            return self.finish(sink, TaskEvent::Skipped);
        }

        self.in_flight.store(true, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let updater = {
            let sink = sink.clone();
            let task = self.name.clone();
            Updater::new(move |message| {
                sink.emit(PipelineEvent::Task {
                    task: task.clone(),
                    event: TaskEvent::Update { message },
                });
            })
        };

        info!(
            added = filtered.added.len(),
            changed = filtered.changed.len(),
            removed = filtered.removed.len(),
            "running task"
        );
        let event = self.executor.run(filtered, updater).await;

        match &event {
            TaskEvent::Result(report) if report.has_errors() => {
                warn!(errors = report.errors.len(), "task reported errors")
            }
            TaskEvent::Result(_) => info!("task succeeded"),
            TaskEvent::Error(error) => warn!(%error, "task failed"),
            TaskEvent::Stop => info!("task stopped"),
            TaskEvent::Skipped | TaskEvent::Update { .. } => {}
        }
        self.finish(sink, event)
    }

    fn finish(&self, sink: &EventSink, event: TaskEvent) -> TaskEvent {
        sink.emit(PipelineEvent::Task {
            task: self.name.clone(),
            event: event.clone(),
        });
        event
    }

    /// Stop the in-flight run, if any.
    pub async fn stop(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        debug!(parent: &self.span, "stop requested");
        self.executor.stop().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.executor.shutdown().await
    }
}
