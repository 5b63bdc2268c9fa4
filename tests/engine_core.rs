// tests/engine_core.rs

use watchpipe::engine::{CoreCommand, CoreRuntime, RuntimeEvent, RuntimeOptions};

fn watching() -> CoreRuntime {
    CoreRuntime::new(RuntimeOptions::default())
}

#[test]
fn test_first_change_starts_a_run() {
    let mut core = watching();
    assert!(core.is_idle());

    let step = core.step(RuntimeEvent::ChangesDetected);
    assert_eq!(step.commands, vec![CoreCommand::StartRun]);
    assert!(step.keep_running);
    assert!(!core.is_idle());
    assert_eq!(core.state().runs_started, 1);
}

#[test]
fn test_change_during_run_queues_one_restart_and_stops_the_run() {
    let mut core = watching();
    core.step(RuntimeEvent::ChangesDetected);

    let step = core.step(RuntimeEvent::ChangesDetected);
    assert_eq!(step.commands, vec![CoreCommand::StopRun]);
    assert!(core.state().restart_queued);

    // Further changes coalesce into the restart already queued.
    for _ in 0..5 {
        let step = core.step(RuntimeEvent::ChangesDetected);
        assert!(step.commands.is_empty());
    }

    // The stopped run ends; the queued restart starts without clearing.
    let step = core.step(RuntimeEvent::RunFinished { success: false });
    assert_eq!(step.commands, vec![CoreCommand::StartRun]);
    assert!(!core.state().restart_queued);
    assert_eq!(core.state().runs_started, 2);
}

#[test]
fn test_successful_run_clears_changes() {
    let mut core = watching();
    core.step(RuntimeEvent::ChangesDetected);

    let step = core.step(RuntimeEvent::RunFinished { success: true });
    assert_eq!(step.commands, vec![CoreCommand::ClearChanges]);
    assert!(step.keep_running);
    assert!(core.is_idle());
}

#[test]
fn test_failed_run_keeps_changes_for_the_next_trigger() {
    let mut core = watching();
    core.step(RuntimeEvent::ChangesDetected);

    let step = core.step(RuntimeEvent::RunFinished { success: false });
    assert!(step.commands.is_empty());
    assert!(step.keep_running);

    let step = core.step(RuntimeEvent::ChangesDetected);
    assert_eq!(step.commands, vec![CoreCommand::StartRun]);
}

#[test]
fn test_exit_when_idle_ends_after_the_first_run() {
    let mut core = CoreRuntime::new(RuntimeOptions {
        exit_when_idle: true,
    });
    core.step(RuntimeEvent::ChangesDetected);

    let step = core.step(RuntimeEvent::RunFinished { success: true });
    assert_eq!(
        step.commands,
        vec![CoreCommand::ClearChanges, CoreCommand::RequestExit]
    );
    assert!(!step.keep_running);
}

#[test]
fn test_exit_when_idle_waits_for_a_queued_restart() {
    let mut core = CoreRuntime::new(RuntimeOptions {
        exit_when_idle: true,
    });
    core.step(RuntimeEvent::ChangesDetected);
    core.step(RuntimeEvent::ChangesDetected);

    let step = core.step(RuntimeEvent::RunFinished { success: false });
    assert_eq!(step.commands, vec![CoreCommand::StartRun]);
    assert!(step.keep_running);

    let step = core.step(RuntimeEvent::RunFinished { success: false });
    assert_eq!(step.commands, vec![CoreCommand::RequestExit]);
    assert!(!step.keep_running);
}

#[test]
fn test_shutdown_exits_and_ignores_later_changes() {
    let mut core = watching();
    core.step(RuntimeEvent::ChangesDetected);
    core.step(RuntimeEvent::ChangesDetected);

    let step = core.step(RuntimeEvent::ShutdownRequested);
    assert_eq!(step.commands, vec![CoreCommand::RequestExit]);
    assert!(!step.keep_running);
    assert!(core.state().closing);
    assert!(!core.state().restart_queued);

    let step = core.step(RuntimeEvent::ChangesDetected);
    assert!(step.commands.is_empty());
    let step = core.step(RuntimeEvent::RunFinished { success: true });
    assert!(step.commands.is_empty());
}
