pub mod builders;
pub mod scripted_task;

use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};
use watchpipe::exec::{InProcessRunner, RunnableTask};
use watchpipe::logging::LOG_ENV;
use watchpipe::pipeline::{EventListener, PipelineEvent, TaskEvent, TaskNode};
use watchpipe::types::ChangeSet;
use watchpipe::watch::PathFilter;

pub use watchpipe::watch::SnapshotSource as ManualChangeSource;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `WATCHPIPE_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Every event a listener received, in order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl EventLog {
    pub fn listener(&self) -> EventListener {
        let events = self.events.clone();
        Arc::new(move |event: &PipelineEvent| {
            events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        })
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Terminal task events for `task`, ignoring updates.
    pub fn terminals_for(&self, task: &str) -> Vec<TaskEvent> {
        self.events()
            .iter()
            .filter_map(PipelineEvent::task_event)
            .filter(|(name, event)| *name == task && event.is_terminal())
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn updates_for(&self, task: &str) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(PipelineEvent::task_event)
            .filter(|(name, _)| *name == task)
            .filter_map(|(_, event)| match event {
                TaskEvent::Update { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A task node running `task` in-process, filtered by `include`
/// (everything passes when empty).
pub fn in_process_node(name: &str, task: Arc<dyn RunnableTask>, include: &[&str]) -> Arc<TaskNode> {
    in_process_node_with_timeout(name, task, include, Duration::from_secs(2))
}

pub fn in_process_node_with_timeout(
    name: &str,
    task: Arc<dyn RunnableTask>,
    include: &[&str],
    stop_timeout: Duration,
) -> Arc<TaskNode> {
    let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
    let filter = if include.is_empty() {
        PathFilter::allow_all()
    } else {
        PathFilter::new(Some(&include), None).expect("valid include patterns")
    };
    let runner = InProcessRunner::new(
        name,
        task,
        Arc::new(serde_json::Value::Null),
        stop_timeout,
    );
    Arc::new(TaskNode::new(name, filter, Arc::new(runner)))
}

/// A change set where every path is in the `changed` bucket.
pub fn changed(paths: &[&str]) -> ChangeSet {
    ChangeSet::new(
        Vec::<String>::new(),
        paths.iter().copied(),
        Vec::<String>::new(),
    )
}
