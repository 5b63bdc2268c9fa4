// src/exec/runnable.rs

//! The contract a leaf task implementation must satisfy.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorInfo;
use crate::types::{BoxFuture, ChangeSet};

/// What a leaf run reports when it settles normally.
///
/// A non-empty `errors` list is a *reported* failure: the task ran and found
/// problems. Infrastructure failures travel as `TaskEvent::Error` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<Value>,
}

impl TaskReport {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn with_results(results: Vec<Value>) -> Self {
        Self {
            errors: Vec::new(),
            results,
        }
    }

    pub fn failed(errors: Vec<ErrorInfo>) -> Self {
        Self {
            errors,
            results: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Progress callback handed to a leaf run. May be called any number of
/// times before the run settles.
#[derive(Clone)]
pub struct Updater {
    inner: Arc<dyn Fn(String) + Send + Sync>,
}

impl fmt::Debug for Updater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Updater").finish_non_exhaustive()
    }
}

impl Updater {
    pub fn new(f: impl Fn(String) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    /// An updater that drops every message.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn update(&self, message: impl Into<String>) {
        (self.inner)(message.into());
    }
}

/// A user-supplied unit of work.
///
/// `run` receives the (already filtered) change set, an [`Updater`], and the
/// opaque options bag from the task's configuration. Returning `Err` is an
/// unexpected failure; returning a report with errors is an expected one.
///
/// `stop` may be called while `run` is in flight, from another task. It
/// should make the in-flight `run` settle promptly.
pub trait RunnableTask: Send + Sync {
    fn run<'a>(
        &'a self,
        changes: &'a ChangeSet,
        update: Updater,
        options: &'a Value,
    ) -> BoxFuture<'a, anyhow::Result<Option<TaskReport>>>;

    fn stop(&self) -> BoxFuture<'_, ()>;
}
