// tests/in_process.rs

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use watchpipe::errors::WatchpipeError;
use watchpipe::exec::runnable::{TaskReport, Updater};
use watchpipe::exec::{InProcessRunner, LeafExecutor, RunnableTask};
use watchpipe::pipeline::TaskEvent;
use watchpipe::types::{BoxFuture, ChangeSet};
use watchpipe_test_utils::scripted_task::{Behaviour, ScriptedTask};
use watchpipe_test_utils::{changed, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn runner(task: Arc<dyn RunnableTask>, stop_timeout: Duration) -> InProcessRunner {
    InProcessRunner::new("leaf", task, Arc::new(Value::Null), stop_timeout)
}

#[tokio::test]
async fn test_stop_that_never_settles_times_out() -> TestResult {
    init_tracing();
    let (task, tally) = ScriptedTask::new(Behaviour::NeverSettle).shared();
    let runner = runner(task, Duration::from_millis(100));

    let run = runner.run(changed(&["a.txt"]), Updater::noop());
    let stopper = async {
        tally.wait_for_runs(1).await;
        let started = Instant::now();
        let result = runner.stop().await;
        (result, started.elapsed())
    };

    // The run itself never ends; only the stop side is awaited.
    let (stop_result, elapsed) = with_timeout(async {
        tokio::select! {
            _ = run => unreachable!("a never-settling run cannot finish"),
            out = stopper => out,
        }
    })
    .await;

    match stop_result {
        Err(WatchpipeError::TaskTerminationTimeout { task, timeout }) => {
            assert_eq!(task, "leaf");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("Expected TaskTerminationTimeout, got: {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(100));
    assert_eq!(tally.stops(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stopped_run_ends_with_stop() -> TestResult {
    init_tracing();
    let (task, tally) = ScriptedTask::new(Behaviour::Delay(Duration::from_secs(30))).shared();
    let runner = runner(task, Duration::from_secs(1));

    let run = runner.run(changed(&["a.txt"]), Updater::noop());
    let stopper = async {
        tally.wait_for_runs(1).await;
        runner.stop().await
    };
    let (event, stopped) = with_timeout(async { tokio::join!(run, stopper) }).await;

    stopped?;
    assert_eq!(event, TaskEvent::Stop);
    Ok(())
}

#[tokio::test]
async fn test_stop_while_idle_does_not_touch_the_task() -> TestResult {
    let (task, tally) = ScriptedTask::new(Behaviour::Succeed).shared();
    let runner = runner(task, Duration::from_secs(1));

    runner.stop().await?;
    assert_eq!(tally.stops(), 0);
    Ok(())
}

#[tokio::test]
async fn test_err_from_run_becomes_error_event() {
    let (task, _) = ScriptedTask::new(Behaviour::Error("disk on fire".into())).shared();
    let runner = runner(task, Duration::from_secs(1));

    match with_timeout(runner.run(changed(&["a.txt"]), Updater::noop())).await {
        TaskEvent::Error(info) => assert!(info.message.contains("disk on fire")),
        other => panic!("expected an error event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reported_failure_is_a_result_with_errors() {
    let (task, _) = ScriptedTask::new(Behaviour::Fail("3 warnings".into())).shared();
    let runner = runner(task, Duration::from_secs(1));

    let event = with_timeout(runner.run(changed(&["a.txt"]), Updater::noop())).await;
    assert!(!event.is_success());
    match event {
        TaskEvent::Result(report) => {
            assert_eq!(report.errors.len(), 1);
            assert_eq!(report.errors[0].name, "ScriptedFailure");
        }
        other => panic!("expected a result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_runner_can_be_reused_after_a_stop() -> TestResult {
    let (task, tally) = ScriptedTask::new(Behaviour::BlockUntilStopped).shared();
    let runner = runner(task, Duration::from_secs(1));

    for round in 1..=2 {
        let run = runner.run(changed(&["a.txt"]), Updater::noop());
        let stopper = async {
            tally.wait_for_runs(round).await;
            runner.stop().await
        };
        let (event, stopped) = with_timeout(async { tokio::join!(run, stopper) }).await;
        stopped?;
        assert_eq!(event, TaskEvent::Stop, "round {round}");
    }
    assert_eq!(tally.runs(), 2);
    Ok(())
}

/// Reports its options back as the only result.
struct EchoOptions;

impl RunnableTask for EchoOptions {
    fn run<'a>(
        &'a self,
        _changes: &'a ChangeSet,
        _update: Updater,
        options: &'a Value,
    ) -> BoxFuture<'a, anyhow::Result<Option<TaskReport>>> {
        Box::pin(async move { Ok(Some(TaskReport::with_results(vec![options.clone()]))) })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

#[tokio::test]
async fn test_options_reach_the_task_unmodified() {
    let options = json!({ "level": 3, "paths": ["a", "b"], "nested": { "on": true } });
    let runner = InProcessRunner::new(
        "opts",
        Arc::new(EchoOptions),
        Arc::new(options.clone()),
        Duration::from_secs(1),
    );

    match with_timeout(runner.run(changed(&["a.txt"]), Updater::noop())).await {
        TaskEvent::Result(report) => assert_eq!(report.results, vec![options]),
        other => panic!("expected a result, got {other:?}"),
    }
}
