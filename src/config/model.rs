// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::types::{parse_duration, TaskName};

pub const DEFAULT_ON_CHANGE_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [watcher]
/// include = ["src/**"]
/// exclude = ["target/**"]
/// on_change_timeout = "100ms"
///
/// [worker_pool]
/// pool_size = 4
///
/// [[tasks]]
/// module = "command"
/// include = ["**/*.rs"]
/// options = { cmd = "cargo check" }
///
/// [[tasks]]
/// name = "checks"
/// parallel = true
/// [[tasks.tasks]]
/// module = "command"
/// options = { cmd = "cargo test" }
/// ```
///
/// This is the *raw* shape; obtain a [`ConfigFile`] through
/// `ConfigFile::try_from`, which validates it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub watcher: WatcherSection,

    #[serde(default)]
    pub worker_pool: WorkerPoolSection,

    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub watcher: WatcherSection,
    pub worker_pool: WorkerPoolSection,
    pub tasks: Vec<TaskEntry>,
}

impl ConfigFile {
    /// Construct without validation. Only `validate.rs` should call this.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            watcher: raw.watcher,
            worker_pool: raw.worker_pool,
            tasks: raw.tasks,
        }
    }

    /// Iterate over every leaf task, including group members.
    pub fn leaf_tasks(&self) -> impl Iterator<Item = &TaskOptions> {
        self.tasks.iter().flat_map(|entry| match entry {
            TaskEntry::Task(task) => std::slice::from_ref(task).iter(),
            TaskEntry::Group(group) => group.tasks.iter(),
        })
    }
}

/// `[watcher]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherSection {
    /// Glob patterns (relative to the project root) to watch.
    ///
    /// `None` means everything under the root.
    #[serde(default)]
    pub include: Option<Vec<String>>,

    #[serde(default)]
    pub exclude: Option<Vec<String>>,

    /// Debounce quiet period, e.g. `"100ms"`.
    #[serde(default)]
    pub on_change_timeout: Option<String>,

    /// Seed a first run with every matching file at startup.
    #[serde(default = "default_initial_run")]
    pub initial_run: bool,
}

fn default_initial_run() -> bool {
    true
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            include: None,
            exclude: None,
            on_change_timeout: None,
            initial_run: default_initial_run(),
        }
    }
}

impl WatcherSection {
    pub fn effective_on_change_timeout(&self) -> Duration {
        effective_duration(self.on_change_timeout.as_deref(), DEFAULT_ON_CHANGE_TIMEOUT)
    }
}

/// `[worker_pool]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerPoolSection {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for WorkerPoolSection {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
        }
    }
}

/// One entry of the top-level `tasks` array: a leaf task or a group.
///
/// Groups are recognised by their `tasks` list; leaves by `module`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TaskEntry {
    Group(GroupOptions),
    Task(TaskOptions),
}

impl TaskEntry {
    pub fn name(&self) -> &str {
        match self {
            TaskEntry::Group(group) => group.name.as_deref().unwrap_or("group"),
            TaskEntry::Task(task) => task.display_name(),
        }
    }
}

/// A group of leaf tasks run together as one scheduling unit.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupOptions {
    #[serde(default)]
    pub name: Option<TaskName>,

    pub tasks: Vec<TaskOptions>,

    #[serde(default)]
    pub parallel: bool,
}

/// A leaf task.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskOptions {
    /// Display name; defaults to `module`.
    #[serde(default)]
    pub name: Option<TaskName>,

    /// Registry module name, or an executable path when `fork = true`.
    pub module: String,

    #[serde(default)]
    pub include: Option<Vec<String>>,

    #[serde(default)]
    pub exclude: Option<Vec<String>>,

    /// Keep the child process alive between runs (process mode).
    #[serde(default)]
    pub persistent: bool,

    /// Run in a child process instead of a worker-pool thread.
    #[serde(default)]
    pub fork: bool,

    /// Extra argv for the child process (process mode).
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub stop_timeout: Option<String>,

    #[serde(default)]
    pub exit_timeout: Option<String>,

    /// Opaque bag handed to the leaf implementation unmodified.
    #[serde(default)]
    pub options: Value,
}

impl TaskOptions {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            name: None,
            module: module.into(),
            include: None,
            exclude: None,
            persistent: false,
            fork: false,
            args: Vec::new(),
            stop_timeout: None,
            exit_timeout: None,
            options: Value::Null,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.module)
    }

    pub fn effective_stop_timeout(&self) -> Duration {
        effective_duration(self.stop_timeout.as_deref(), DEFAULT_STOP_TIMEOUT)
    }

    pub fn effective_exit_timeout(&self) -> Duration {
        effective_duration(self.exit_timeout.as_deref(), DEFAULT_EXIT_TIMEOUT)
    }
}

/// Durations are checked during validation; a bad string can only reach
/// here through `new_unchecked`, in which case the default applies.
fn effective_duration(raw: Option<&str>, default: Duration) -> Duration {
    raw.and_then(|s| parse_duration(s).ok()).unwrap_or(default)
}
