// src/exec/mod.rs

//! Leaf execution layer.
//!
//! This module is responsible for actually running the leaf tasks of the
//! pipeline and turning whatever they do into one terminal
//! [`TaskEvent`](crate::pipeline::events::TaskEvent) per run.
//!
//! - [`runnable`] defines the contract user tasks implement.
//! - [`backend`] provides the `LeafExecutor` trait task nodes talk to.
//! - [`in_process`] runs a task on the calling runtime.
//! - [`pool`] ships runs to a fixed set of worker threads.
//! - [`process`] and [`protocol`] drive forked tasks over JSON lines, and
//!   [`child`] is the matching harness for the child side.
//! - [`loader`] resolves `module` references; [`command`] is the built-in
//!   shell command task.

pub mod backend;
pub mod child;
pub mod command;
pub mod gate;
pub mod in_process;
pub mod loader;
pub mod pool;
pub mod process;
pub mod protocol;
pub mod runnable;

pub use backend::LeafExecutor;
pub use command::CommandTask;
pub use in_process::InProcessRunner;
pub use loader::{ModuleRegistry, TaskLoader, resolve_executable};
pub use pool::{PoolStats, PooledExecutor, WorkerPool};
pub use process::{ProcessExecutor, ProcessSpec};
pub use runnable::{RunnableTask, TaskReport, Updater};
