// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::debug;

use crate::engine::RuntimeOptions;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreCommand {
    /// Snapshot the accumulated changes and start a scheduler run.
    StartRun,
    /// Ask the active run to stop (a restart is queued behind it).
    StopRun,
    /// Discard the accumulated changes.
    ClearChanges,
    /// Leave the event loop and run the shutdown sequence.
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn continue_with(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    fn exit_with(mut commands: Vec<CoreCommand>) -> Self {
        commands.push(CoreCommand::RequestExit);
        Self {
            commands,
            keep_running: false,
        }
    }
}

/// Restart-policy state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    /// A scheduler run is in flight.
    pub run_active: bool,
    /// One restart is queued behind the active run.
    pub restart_queued: bool,
    /// Shutdown has begun; no new runs start.
    pub closing: bool,
    /// Runs started so far.
    pub runs_started: u64,
}

/// Handle a change notification.
///
/// - Idle: start a run right away.
/// - Run active, no restart queued: queue one and stop the active run.
/// - Restart already queued: nothing; the queued run will pick up whatever
///   has accumulated by the time it starts.
pub fn handle_changes_detected(state: &mut RunState) -> CoreStep {
    if state.closing {
        debug!("closing; ignoring change notification");
        return CoreStep::continue_with(Vec::new());
    }

    if !state.run_active {
        state.run_active = true;
        state.runs_started += 1;
        return CoreStep::continue_with(vec![CoreCommand::StartRun]);
    }

    if !state.restart_queued {
        debug!("run active; queueing restart");
        state.restart_queued = true;
        return CoreStep::continue_with(vec![CoreCommand::StopRun]);
    }

    debug!("restart already queued; coalescing");
    CoreStep::continue_with(Vec::new())
}

/// Handle the end of a run.
///
/// - A queued restart starts immediately, without clearing: changes that
///   arrived during the aborted run must reach the next one.
/// - Otherwise success clears the accumulated changes and failure keeps
///   them for the next trigger.
/// - With `exit_when_idle`, the loop ends once nothing else is pending.
pub fn handle_run_finished(
    state: &mut RunState,
    options: &RuntimeOptions,
    success: bool,
) -> CoreStep {
    state.run_active = false;

    if state.closing {
        return CoreStep::continue_with(Vec::new());
    }

    if state.restart_queued {
        state.restart_queued = false;
        state.run_active = true;
        state.runs_started += 1;
        return CoreStep::continue_with(vec![CoreCommand::StartRun]);
    }

    let mut commands = Vec::new();
    if success {
        commands.push(CoreCommand::ClearChanges);
    }

    if options.exit_when_idle {
        state.closing = true;
        return CoreStep::exit_with(commands);
    }
    CoreStep::continue_with(commands)
}

/// Handle a shutdown request.
pub fn handle_shutdown(state: &mut RunState) -> CoreStep {
    state.closing = true;
    state.restart_queued = false;
    CoreStep::exit_with(Vec::new())
}
