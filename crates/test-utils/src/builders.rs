#![allow(dead_code)]

use serde_json::Value;
use watchpipe::config::{
    ConfigFile, GroupOptions, RawConfigFile, TaskEntry, TaskOptions, WatcherSection,
    WorkerPoolSection,
};
use watchpipe::errors::WatchpipeError;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                watcher: WatcherSection::default(),
                worker_pool: WorkerPoolSection { pool_size: 2 },
                tasks: Vec::new(),
            },
        }
    }

    pub fn with_task(mut self, task: TaskOptions) -> Self {
        self.config.tasks.push(TaskEntry::Task(task));
        self
    }

    pub fn with_group(mut self, group: GroupOptions) -> Self {
        self.config.tasks.push(TaskEntry::Group(group));
        self
    }

    pub fn with_watch_include(mut self, pattern: &str) -> Self {
        self.config
            .watcher
            .include
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn with_watch_exclude(mut self, pattern: &str) -> Self {
        self.config
            .watcher
            .exclude
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn with_on_change_timeout(mut self, timeout: &str) -> Self {
        self.config.watcher.on_change_timeout = Some(timeout.to_string());
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool.pool_size = size;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile, WatchpipeError> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskOptions`.
pub struct TaskOptionsBuilder {
    task: TaskOptions,
}

impl TaskOptionsBuilder {
    pub fn new(module: &str) -> Self {
        Self {
            task: TaskOptions::new(module),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.task.name = Some(name.to_string());
        self
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.task
            .include
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.task
            .exclude
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn fork(mut self) -> Self {
        self.task.fork = true;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.task.persistent = true;
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.task.args.push(arg.to_string());
        self
    }

    pub fn stop_timeout(mut self, timeout: &str) -> Self {
        self.task.stop_timeout = Some(timeout.to_string());
        self
    }

    pub fn exit_timeout(mut self, timeout: &str) -> Self {
        self.task.exit_timeout = Some(timeout.to_string());
        self
    }

    pub fn options(mut self, options: Value) -> Self {
        self.task.options = options;
        self
    }

    pub fn build(self) -> TaskOptions {
        self.task
    }
}

/// Builder for `GroupOptions`.
pub struct GroupOptionsBuilder {
    group: GroupOptions,
}

impl GroupOptionsBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            group: GroupOptions {
                name: Some(name.to_string()),
                tasks: Vec::new(),
                parallel: false,
            },
        }
    }

    pub fn parallel(mut self) -> Self {
        self.group.parallel = true;
        self
    }

    pub fn task(mut self, task: TaskOptions) -> Self {
        self.group.tasks.push(task);
        self
    }

    pub fn build(self) -> GroupOptions {
        self.group
    }
}
