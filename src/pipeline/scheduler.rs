// src/pipeline/scheduler.rs

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::model::{ConfigFile, TaskEntry};
use crate::errors::{Result, WatchpipeError};
use crate::pipeline::BuildContext;
use crate::pipeline::events::{EventListener, EventSink, TaskEvent};
use crate::pipeline::group_node::GroupNode;
use crate::pipeline::task_node::TaskNode;
use crate::types::ChangeSet;

/// A top-level pipeline entry.
#[derive(Debug, Clone)]
pub enum PipelineNode {
    Task(Arc<TaskNode>),
    Group(Arc<GroupNode>),
}

impl PipelineNode {
    pub fn name(&self) -> &str {
        match self {
            PipelineNode::Task(task) => task.name(),
            PipelineNode::Group(group) => group.name(),
        }
    }

    pub async fn run(&self, changes: &ChangeSet, sink: &EventSink) -> TaskEvent {
        match self {
            PipelineNode::Task(task) => task.run(changes, sink).await,
            PipelineNode::Group(group) => group.run(changes, sink).await,
        }
    }

    pub async fn stop(&self) -> Result<()> {
        match self {
            PipelineNode::Task(task) => task.stop().await,
            PipelineNode::Group(group) => group.stop().await,
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        match self {
            PipelineNode::Task(task) => task.shutdown().await,
            PipelineNode::Group(group) => group.shutdown().await,
        }
    }
}

/// Runs the top-level nodes in declaration order, at most one run at a time.
pub struct Scheduler {
    nodes: Vec<PipelineNode>,
    running: AtomicBool,
    stopping: AtomicBool,
    current: Mutex<Option<usize>>,
    listener: Mutex<Option<EventListener>>,
    runs: AtomicU64,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("nodes", &self.nodes)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Marks the scheduler idle when a run ends or its future is dropped.
struct RunGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.scheduler.current() = None;
        self.scheduler.running.store(false, Ordering::SeqCst);
    }
}

impl Scheduler {
    pub fn new(nodes: Vec<PipelineNode>) -> Self {
        Self {
            nodes,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            current: Mutex::new(None),
            listener: Mutex::new(None),
            runs: AtomicU64::new(0),
        }
    }

    /// Build every node from `[[tasks]]`, in order.
    pub fn from_config(cfg: &ConfigFile, ctx: &BuildContext<'_>) -> Result<Self> {
        let mut nodes = Vec::with_capacity(cfg.tasks.len());
        for entry in cfg.tasks.iter() {
            let node = match entry {
                TaskEntry::Task(task) => PipelineNode::Task(Arc::new(TaskNode::from_options(task, ctx)?)),
                TaskEntry::Group(group) => {
                    PipelineNode::Group(Arc::new(GroupNode::from_options(entry.name(), group, ctx)?))
                }
            };
            nodes.push(node);
        }
        info!(nodes = nodes.len(), "pipeline built");
        Ok(Self::new(nodes))
    }

    pub fn nodes(&self) -> &[PipelineNode] {
        &self.nodes
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn current(&self) -> MutexGuard<'_, Option<usize>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> MutexGuard<'_, Option<EventListener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the single event listener. Fails if one is already attached.
    ///
    /// The listener is captured when a run starts; attaching mid-run only
    /// affects later runs.
    pub fn set_event_listener(&self, listener: EventListener) -> Result<()> {
        let mut slot = self.listener();
        if slot.is_some() {
            return Err(WatchpipeError::ListenerAlreadyAttached);
        }
        *slot = Some(listener);
        Ok(())
    }

    pub fn remove_event_listener(&self) -> Option<EventListener> {
        self.listener().take()
    }

    /// Start a pipeline run, publishing to the attached listener (if any).
    ///
    /// The busy check happens here, synchronously: while another run is in
    /// progress this returns `TaskRunning` and nothing is started. The
    /// returned future resolves to `true` when no node errored, reported
    /// errors, or was stopped.
    pub fn run(&self, changes: ChangeSet) -> Result<impl Future<Output = bool> + Send + '_> {
        let sink = EventSink::from(self.listener().clone());
        self.run_with(changes, sink)
    }

    /// Like [`run`](Self::run), with the event sink passed in explicitly.
    pub fn run_with(
        &self,
        changes: ChangeSet,
        sink: EventSink,
    ) -> Result<impl Future<Output = bool> + Send + '_> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WatchpipeError::TaskRunning);
        }
        let guard = RunGuard { scheduler: self };
        self.stopping.store(false, Ordering::SeqCst);
        let run_id = self.runs.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(async move {
            let _guard = guard;
            self.run_nodes(&changes, &sink).await
        }
        .instrument(info_span!("run", run_id)))
    }

    async fn run_nodes(&self, changes: &ChangeSet, sink: &EventSink) -> bool {
        info!(
            added = changes.added.len(),
            changed = changes.changed.len(),
            removed = changes.removed.len(),
            "pipeline run started"
        );

        for (idx, node) in self.nodes.iter().enumerate() {
            if self.stopping.load(Ordering::SeqCst) {
                debug!(node = node.name(), "run halted; not starting");
                break;
            }
            *self.current() = Some(idx);
            let event = node.run(changes, sink).await;
            if !event.is_success() {
                debug!(node = node.name(), outcome = event.label(), "node halts the run");
                self.stopping.store(true, Ordering::SeqCst);
            }
        }
        *self.current() = None;

        let success = !self.stopping.load(Ordering::SeqCst);
        info!(success, "pipeline run finished");
        success
    }

    /// Stop the current run: the node in progress is stopped and no further
    /// nodes start. A no-op when idle.
    pub async fn stop(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        self.stopping.store(true, Ordering::SeqCst);
        let current = *self.current();
        match current.and_then(|idx| self.nodes.get(idx)) {
            Some(node) => {
                info!(node = node.name(), "stopping pipeline run");
                node.stop().await
            }
            None => Ok(()),
        }
    }

    /// Release per-node resources such as persistent task processes.
    pub async fn shutdown(&self) -> Result<()> {
        for node in self.nodes.iter() {
            if let Err(e) = node.shutdown().await {
                warn!(node = node.name(), error = %e, "node shutdown failed");
            }
        }
        Ok(())
    }
}
