// tests/process_executor.rs

#![cfg(unix)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Notify;
use watchpipe::exec::runnable::Updater;
use watchpipe::exec::{LeafExecutor, ProcessExecutor, ProcessSpec};
use watchpipe::pipeline::TaskEvent;
use watchpipe_test_utils::{changed, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const DEMO_TASK: &str = env!("CARGO_BIN_EXE_watchpipe-demo-task");

fn spec(program: impl Into<PathBuf>, options: Value) -> ProcessSpec {
    ProcessSpec {
        program: program.into(),
        args: Vec::new(),
        cwd: None,
        options,
        persistent: false,
        stop_timeout: Duration::from_secs(2),
        exit_timeout: Duration::from_secs(2),
    }
}

fn collecting_updater() -> (Updater, Arc<Mutex<Vec<String>>>) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    (
        Updater::new(move |message| sink.lock().unwrap().push(message)),
        updates,
    )
}

#[tokio::test]
async fn test_child_run_relays_updates_and_result() -> TestResult {
    init_tracing();
    let executor = ProcessExecutor::new("demo", spec(DEMO_TASK, Value::Null));
    let (updater, updates) = collecting_updater();

    let event = with_timeout(executor.run(changed(&["src/a.rs", "src/b.rs"]), updater)).await;

    match event {
        TaskEvent::Result(report) => {
            assert!(!report.has_errors());
            assert_eq!(report.results.len(), 2);
            assert_eq!(report.results[0]["path"], "src/a.rs");
        }
        other => panic!("expected a result, got {other:?}"),
    }
    assert_eq!(
        *updates.lock().unwrap(),
        vec!["checked src/a.rs".to_string(), "checked src/b.rs".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_child_reported_failure_arrives_as_result_errors() -> TestResult {
    init_tracing();
    let executor = ProcessExecutor::new("demo", spec(DEMO_TASK, Value::Null));

    let event = with_timeout(executor.run(changed(&["tests/fail_me.rs"]), Updater::noop())).await;

    match event {
        TaskEvent::Result(report) => {
            assert_eq!(report.errors.len(), 1);
            assert_eq!(report.errors[0].name, "CheckFailed");
        }
        other => panic!("expected a result with errors, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_stop_directive_ends_the_run_with_stop() -> TestResult {
    init_tracing();
    let executor = ProcessExecutor::new("demo", spec(DEMO_TASK, json!({ "delay_ms": 30_000 })));

    let started = Arc::new(Notify::new());
    let signal = Arc::clone(&started);
    let updater = Updater::new(move |_| signal.notify_one());

    let run = executor.run(changed(&["slow.rs"]), updater);
    let stopper = async {
        started.notified().await;
        executor.stop().await
    };
    let (event, stopped) = with_timeout(async { tokio::join!(run, stopper) }).await;

    stopped?;
    assert_eq!(event, TaskEvent::Stop);
    Ok(())
}

#[tokio::test]
async fn test_child_crash_is_an_unexpected_termination() -> TestResult {
    init_tracing();
    let executor = ProcessExecutor::new("demo", spec(DEMO_TASK, json!({ "crash_on": "boom" })));

    let event = with_timeout(executor.run(changed(&["boom.rs"]), Updater::noop())).await;

    match event {
        TaskEvent::Error(info) => assert_eq!(info.name, "UnexpectedTaskTerminationError"),
        other => panic!("expected an error event, got {other:?}"),
    }

    // The next run gets a fresh process.
    let event = with_timeout(executor.run(changed(&["fine.rs"]), Updater::noop())).await;
    assert!(event.is_success());
    Ok(())
}

#[tokio::test]
async fn test_persistent_child_serves_several_runs() -> TestResult {
    init_tracing();
    let mut persistent = spec(DEMO_TASK, Value::Null);
    persistent.persistent = true;
    let executor = ProcessExecutor::new("demo", persistent);

    for path in ["one.rs", "two.rs", "three.rs"] {
        let event = with_timeout(executor.run(changed(&[path]), Updater::noop())).await;
        assert!(event.is_success(), "run for {path} gave {event:?}");
    }

    with_timeout(executor.shutdown()).await?;
    Ok(())
}

#[tokio::test]
async fn test_missing_program_is_an_invalid_task() {
    init_tracing();
    let executor = ProcessExecutor::new("ghost", spec("/definitely/not/here", Value::Null));

    match with_timeout(executor.run(changed(&["a.rs"]), Updater::noop())).await {
        TaskEvent::Error(info) => assert_eq!(info.name, "InvalidRunnableTaskError"),
        other => panic!("expected an error event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_silent_child_fails_the_ready_handshake() {
    init_tracing();
    // `cat` never answers with a ready event.
    let mut silent = spec("/bin/cat", Value::Null);
    silent.exit_timeout = Duration::from_millis(200);
    let executor = ProcessExecutor::new("silent", silent);

    match with_timeout(executor.run(changed(&["a.rs"]), Updater::noop())).await {
        TaskEvent::Error(info) => assert_eq!(info.name, "DeferredTimeoutError"),
        other => panic!("expected an error event, got {other:?}"),
    }
}
