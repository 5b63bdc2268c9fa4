// src/exec/loader.rs

//! Resolving a task's `module` reference.
//!
//! In-process tasks are looked up by name in a [`ModuleRegistry`]; forked
//! tasks name an executable, resolved by [`resolve_executable`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, WatchpipeError};
use crate::exec::command::CommandTask;
use crate::exec::runnable::RunnableTask;

/// Name under which the built-in shell command task is registered.
pub const COMMAND_MODULE: &str = "command";

pub type TaskFactory = dyn Fn(&Value) -> anyhow::Result<Arc<dyn RunnableTask>> + Send + Sync;

/// Turns a module reference plus options into a runnable task.
pub trait TaskLoader: Send + Sync {
    fn load(&self, reference: &str, options: &Value) -> Result<Arc<dyn RunnableTask>>;
}

/// Name-keyed table of task factories.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, Arc<TaskFactory>>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ModuleRegistry")
            .field("modules", &names)
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `command` module.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(COMMAND_MODULE, |options| {
            Ok(Arc::new(CommandTask::from_options(options)?) as Arc<dyn RunnableTask>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> anyhow::Result<Arc<dyn RunnableTask>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register one shared instance; every task naming `name` gets it.
    pub fn register_instance(
        &mut self,
        name: impl Into<String>,
        task: Arc<dyn RunnableTask>,
    ) -> &mut Self {
        self.register(name, move |_| Ok(Arc::clone(&task)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl TaskLoader for ModuleRegistry {
    fn load(&self, reference: &str, options: &Value) -> Result<Arc<dyn RunnableTask>> {
        let factory =
            self.factories
                .get(reference)
                .ok_or_else(|| WatchpipeError::TaskModuleNotFound {
                    reference: reference.to_string(),
                })?;
        factory(options).map_err(|e| WatchpipeError::InvalidRunnableTask {
            reference: reference.to_string(),
            reason: format!("{e:#}"),
        })
    }
}

/// Resolve the executable for a forked task.
///
/// References containing a path separator are taken relative to `base_dir`
/// (absolute paths stay as they are); bare names are searched on `PATH`.
pub fn resolve_executable(reference: &str, base_dir: &Path) -> Result<PathBuf> {
    let not_found = || WatchpipeError::TaskModuleNotFound {
        reference: reference.to_string(),
    };

    let candidate = if reference.contains('/') || reference.contains('\\') {
        let path = base_dir.join(reference);
        if !path.exists() {
            return Err(not_found());
        }
        path
    } else {
        search_path(reference).ok_or_else(not_found)?
    };

    if !candidate.is_file() {
        return Err(WatchpipeError::InvalidRunnableTask {
            reference: reference.to_string(),
            reason: format!("{} is not a regular file", candidate.display()),
        });
    }
    if !is_executable(&candidate) {
        return Err(WatchpipeError::InvalidRunnableTask {
            reference: reference.to_string(),
            reason: format!("{} is not executable", candidate.display()),
        });
    }

    debug!(reference, path = %candidate.display(), "resolved task executable");
    Ok(candidate)
}

fn search_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
