// src/pipeline/events.rs

use std::fmt;
use std::sync::Arc;

use crate::errors::ErrorInfo;
use crate::exec::runnable::TaskReport;
use crate::types::TaskName;

/// Events a task node produces. `Update` may repeat; exactly one of the
/// other variants ends every run.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Update { message: String },
    Result(TaskReport),
    Error(ErrorInfo),
    Skipped,
    Stop,
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskEvent::Update { .. })
    }

    /// Skipped runs and results without errors count as success.
    pub fn is_success(&self) -> bool {
        match self {
            TaskEvent::Result(report) => !report.has_errors(),
            TaskEvent::Skipped => true,
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskEvent::Update { .. } => "update",
            TaskEvent::Result(_) => "result",
            TaskEvent::Error(_) => "error",
            TaskEvent::Skipped => "skipped",
            TaskEvent::Stop => "stop",
        }
    }
}

/// What a group re-publishes about each of its children's terminal events.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    Result { errors: Vec<ErrorInfo> },
    Skipped,
    Stop,
}

impl GroupEvent {
    /// Child errors reach listeners through the child's own emission, and
    /// updates are not forwarded, so both map to `None`.
    pub fn from_child(event: &TaskEvent) -> Option<Self> {
        match event {
            TaskEvent::Result(report) => Some(GroupEvent::Result {
                errors: report.errors.clone(),
            }),
            TaskEvent::Skipped => Some(GroupEvent::Skipped),
            TaskEvent::Stop => Some(GroupEvent::Stop),
            TaskEvent::Error(_) | TaskEvent::Update { .. } => None,
        }
    }
}

/// Everything an attached listener observes during a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Emitted by a task node, grouped or not.
    Task { task: TaskName, event: TaskEvent },
    /// A group's view of one child's terminal event.
    Group {
        group: TaskName,
        task: TaskName,
        event: GroupEvent,
    },
    /// The group's own terminal event.
    GroupFinished { group: TaskName, event: TaskEvent },
}

impl PipelineEvent {
    pub fn task_event(&self) -> Option<(&str, &TaskEvent)> {
        match self {
            PipelineEvent::Task { task, event } => Some((task.as_str(), event)),
            _ => None,
        }
    }
}

pub type EventListener = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Cheap, clonable handle nodes use to publish events. Empty when no
/// listener is attached.
#[derive(Clone, Default)]
pub struct EventSink {
    listener: Option<EventListener>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("attached", &self.listener.is_some())
            .finish()
    }
}

impl EventSink {
    pub fn new(listener: EventListener) -> Self {
        Self {
            listener: Some(listener),
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(listener) = &self.listener {
            listener(&event);
        }
    }
}

impl From<Option<EventListener>> for EventSink {
    fn from(listener: Option<EventListener>) -> Self {
        Self { listener }
    }
}
