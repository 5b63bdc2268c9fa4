// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated restart-policy state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - snapshotting changes and driving the scheduler
//! - the shutdown sequence
//!
//! The core is unit tested without any Tokio, channels, filesystem, or
//! threads.

use crate::engine::event_handlers::{
    CoreStep, RunState, handle_changes_detected, handle_run_finished, handle_shutdown,
};
use crate::engine::{RuntimeEvent, RuntimeOptions};

#[derive(Debug, Clone, Default)]
pub struct CoreRuntime {
    state: RunState,
    options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(options: RuntimeOptions) -> Self {
        Self {
            state: RunState::default(),
            options,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        !self.state.run_active
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::ChangesDetected => handle_changes_detected(&mut self.state),
            RuntimeEvent::RunFinished { success } => {
                handle_run_finished(&mut self.state, &self.options, success)
            }
            RuntimeEvent::ShutdownRequested => handle_shutdown(&mut self.state),
        }
    }
}
