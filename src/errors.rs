// src/errors.rs

//! Crate-wide error type and the serialisable error payload carried by
//! task events.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchpipeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The referenced task module / executable could not be located.
    #[error("task module not found: {reference}")]
    TaskModuleNotFound { reference: String },

    /// The reference resolved, but to something that cannot run as a task.
    #[error("task '{reference}' is not runnable: {reason}")]
    InvalidRunnableTask { reference: String, reason: String },

    /// `Scheduler::run` was called while another run is in progress.
    #[error("a pipeline run is already in progress")]
    TaskRunning,

    #[error("task '{task}' did not stop within {timeout:?}")]
    TaskTerminationTimeout { task: String, timeout: Duration },

    #[error("task '{task}' terminated unexpectedly: {reason}")]
    UnexpectedTaskTermination { task: String, reason: String },

    #[error("{operation} did not complete within {timeout:?}")]
    DeferredTimeout { operation: String, timeout: Duration },

    #[error("an event listener is already attached")]
    ListenerAlreadyAttached,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WatchpipeError {
    /// Short stable label, used as `ErrorInfo::name`.
    pub fn as_label(&self) -> &'static str {
        match self {
            WatchpipeError::ConfigError(_) => "ConfigError",
            WatchpipeError::IoError(_) => "IoError",
            WatchpipeError::TomlError(_) => "TomlError",
            WatchpipeError::JsonError(_) => "JsonError",
            WatchpipeError::TaskModuleNotFound { .. } => "TaskModuleNotFoundError",
            WatchpipeError::InvalidRunnableTask { .. } => "InvalidRunnableTaskError",
            WatchpipeError::TaskRunning => "TaskRunningError",
            WatchpipeError::TaskTerminationTimeout { .. } => "TaskTerminationTimeoutError",
            WatchpipeError::UnexpectedTaskTermination { .. } => "UnexpectedTaskTerminationError",
            WatchpipeError::DeferredTimeout { .. } => "DeferredTimeoutError",
            WatchpipeError::ListenerAlreadyAttached => "ListenerAlreadyAttachedError",
            WatchpipeError::Other(_) => "Error",
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WatchpipeError>;

/// Plain-data description of an error.
///
/// Task events cross thread and process boundaries, so they carry this
/// instead of a live error value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(default = "default_error_name")]
    pub name: String,
    pub message: String,
}

fn default_error_name() -> String {
    "Error".to_string()
}

impl ErrorInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<WatchpipeError>() {
            Some(inner) => Self::from(inner),
            None => Self::new("Error", format!("{err:#}")),
        }
    }
}

impl From<&WatchpipeError> for ErrorInfo {
    fn from(err: &WatchpipeError) -> Self {
        Self::new(err.as_label(), err.to_string())
    }
}

impl From<WatchpipeError> for ErrorInfo {
    fn from(err: WatchpipeError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ErrorInfo {}
