// src/pipeline/group_node.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::config::model::GroupOptions;
use crate::errors::{ErrorInfo, Result, WatchpipeError};
use crate::exec::runnable::TaskReport;
use crate::pipeline::BuildContext;
use crate::pipeline::events::{EventSink, GroupEvent, PipelineEvent, TaskEvent};
use crate::pipeline::task_node::TaskNode;
use crate::types::{ChangeSet, TaskName};

/// An ordered collection of task nodes, run one after another or all at
/// once. Groups do not nest.
pub struct GroupNode {
    name: TaskName,
    tasks: Vec<Arc<TaskNode>>,
    parallel: bool,
    running: AtomicBool,
    stopping: AtomicBool,
    span: Span,
}

impl std::fmt::Debug for GroupNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupNode")
            .field("name", &self.name)
            .field("tasks", &self.tasks.len())
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl GroupNode {
    pub fn new(name: impl Into<TaskName>, tasks: Vec<Arc<TaskNode>>, parallel: bool) -> Self {
        let name = name.into();
        let span = info_span!("group", group = %name, parallel);
        Self {
            name,
            tasks,
            parallel,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            span,
        }
    }

    pub fn from_options(
        name: impl Into<TaskName>,
        options: &GroupOptions,
        ctx: &BuildContext<'_>,
    ) -> Result<Self> {
        let tasks = options
            .tasks
            .iter()
            .map(|task| TaskNode::from_options(task, ctx).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(name, tasks, options.parallel))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &[Arc<TaskNode>] {
        &self.tasks
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Run every child against `changes`.
    ///
    /// A child error or a child result with errors halts the group: a
    /// sequential group starts no further children, a parallel group stops
    /// the children still running. The group ends as `Stop` when it was
    /// halted or stopped, otherwise as a `Result`.
    pub async fn run(&self, changes: &ChangeSet, sink: &EventSink) -> TaskEvent {
        self.run_inner(changes, sink)
            .instrument(self.span.clone())
            .await
    }

    async fn run_inner(&self, changes: &ChangeSet, sink: &EventSink) -> TaskEvent {
        self.stopping.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        let _running = Running(&self.running);

        info!(tasks = self.tasks.len(), "running group");
        let errors = if self.parallel {
            self.run_parallel(changes, sink).await
        } else {
            self.run_sequential(changes, sink).await
        };

        let event = if self.is_stopping() {
            info!("group halted");
            TaskEvent::Stop
        } else {
            info!("group finished");
            TaskEvent::Result(TaskReport::failed(errors))
        };

        sink.emit(PipelineEvent::GroupFinished {
            group: self.name.clone(),
            event: event.clone(),
        });
        event
    }

    /// Publish the group's view of a child terminal event and report
    /// whether it halts the group.
    fn observe(&self, task: &str, event: &TaskEvent, sink: &EventSink) -> bool {
        if let Some(group_event) = GroupEvent::from_child(event) {
            sink.emit(PipelineEvent::Group {
                group: self.name.clone(),
                task: task.to_string(),
                event: group_event,
            });
        }
        let halts = !event.is_success();
        if halts {
            debug!(task, outcome = event.label(), "child halts the group");
            self.stopping.store(true, Ordering::SeqCst);
        }
        halts
    }

    async fn run_sequential(&self, changes: &ChangeSet, sink: &EventSink) -> Vec<ErrorInfo> {
        for child in self.tasks.iter() {
            if self.is_stopping() {
                debug!(task = child.name(), "group stopping; not starting");
                break;
            }
            let event = child.run(changes, sink).await;
            self.observe(child.name(), &event, sink);
        }
        Vec::new()
    }

    async fn run_parallel(&self, changes: &ChangeSet, sink: &EventSink) -> Vec<ErrorInfo> {
        let changes = Arc::new(changes.clone());
        let mut set = JoinSet::new();
        let mut index_of = HashMap::new();

        for (idx, child) in self.tasks.iter().enumerate() {
            let child = Arc::clone(child);
            let changes = Arc::clone(&changes);
            let sink = sink.clone();
            let handle = set.spawn(
                async move {
                    let event = child.run(&changes, &sink).await;
                    (idx, event)
                }
                .in_current_span(),
            );
            index_of.insert(handle.id(), idx);
        }

        let mut finished = vec![false; self.tasks.len()];
        let mut fanned_out = false;
        let mut errors = Vec::new();

        while let Some(joined) = set.join_next_with_id().await {
            let (idx, event) = match joined {
                Ok((_, outcome)) => outcome,
                Err(join_error) => {
                    let Some(&idx) = index_of.get(&join_error.id()) else {
                        warn!(error = %join_error, "unknown child task failed");
                        continue;
                    };
                    let task = self.tasks[idx].name().to_string();
                    warn!(task = %task, error = %join_error, "child task panicked");
                    let info = ErrorInfo::from(WatchpipeError::UnexpectedTaskTermination {
                        task,
                        reason: join_error.to_string(),
                    });
                    errors.push(info.clone());
                    (idx, TaskEvent::Error(info))
                }
            };
            finished[idx] = true;

            let child = &self.tasks[idx];
            if self.observe(child.name(), &event, sink) && !fanned_out {
                fanned_out = true;
                self.stop_unfinished(&finished);
            }
        }

        errors
    }

    /// Fire-and-forget stop for every child that has not settled yet.
    fn stop_unfinished(&self, finished: &[bool]) {
        for (child, _) in self
            .tasks
            .iter()
            .zip(finished)
            .filter(|(_, done)| !**done)
        {
            let child = Arc::clone(child);
            tokio::spawn(
                async move {
                    if let Err(e) = child.stop().await {
                        warn!(task = child.name(), error = %e, "failed to stop sibling");
                    }
                }
                .in_current_span(),
            );
        }
    }

    /// Stop the group: no further children start and running ones are
    /// stopped concurrently. A no-op when the group is idle.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.stopping.store(true, Ordering::SeqCst);
        info!(parent: &self.span, "stopping group");

        let mut stops = JoinSet::new();
        for child in self.tasks.iter() {
            let child = Arc::clone(child);
            stops.spawn(async move { child.stop().await });
        }

        let mut first_error = None;
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(join_error) => warn!(error = %join_error, "stop task panicked"),
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn shutdown(&self) -> Result<()> {
        for child in self.tasks.iter() {
            child.shutdown().await?;
        }
        Ok(())
    }
}
