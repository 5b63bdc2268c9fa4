// src/pipeline/mod.rs

//! The task pipeline: leaf task nodes, groups of them, and the scheduler
//! that runs the top-level entries in order.
//!
//! Nodes return their terminal [`TaskEvent`](events::TaskEvent) and publish
//! every event to the run's [`EventSink`](events::EventSink).

pub mod events;
pub mod group_node;
pub mod scheduler;
pub mod task_node;

use std::path::Path;

use crate::exec::loader::TaskLoader;
use crate::exec::pool::WorkerPool;

pub use events::{EventListener, EventSink, GroupEvent, PipelineEvent, TaskEvent};
pub use group_node::GroupNode;
pub use scheduler::{PipelineNode, Scheduler};
pub use task_node::TaskNode;

/// What building nodes from configuration needs.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub loader: &'a dyn TaskLoader,
    pub pool: &'a WorkerPool,
    /// Project root: relative executables and child working directory.
    pub root: &'a Path,
}
