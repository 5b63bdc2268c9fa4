// src/engine/mod.rs

//! Orchestration engine for watchpipe.
//!
//! This module ties together:
//! - the change source (the file watcher, or a fixed snapshot in `--once`)
//! - the pipeline scheduler
//! - the restart policy (what happens when changes arrive while a run is
//!   active)
//! - the main runtime event loop that reacts to:
//!   - change notifications
//!   - run completions
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`], and [`Orchestrator`] is the handle callers
//! hold.

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once the first run has finished and no
    /// restart is queued (used for `--once`).
    pub exit_when_idle: bool,
}

/// Events flowing into the runtime from the watcher, run tasks, etc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// The change source has new accumulated changes.
    ChangesDetected,
    /// A pipeline run settled.
    RunFinished { success: bool },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod orchestrator;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep, RunState};
pub use orchestrator::Orchestrator;
pub use runtime::Runtime;
