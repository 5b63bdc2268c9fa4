// tests/worker_pool.rs

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use watchpipe::errors::WatchpipeError;
use watchpipe::exec::runnable::{RunnableTask, TaskReport, Updater};
use watchpipe::exec::{LeafExecutor, PooledExecutor, WorkerPool};
use watchpipe::pipeline::TaskEvent;
use watchpipe::types::{BoxFuture, ChangeSet};
use watchpipe_test_utils::scripted_task::{Behaviour, ScriptedTask};
use watchpipe_test_utils::{changed, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn pooled(name: &str, runnable: Arc<dyn RunnableTask>, pool: &WorkerPool) -> PooledExecutor {
    PooledExecutor::new(
        name,
        runnable,
        Value::Null,
        Duration::from_secs(2),
        pool.clone(),
    )
}

/// Appends its label to a shared log when it starts, then sleeps.
struct Recorder {
    label: &'static str,
    order: Arc<Mutex<Vec<&'static str>>>,
}

impl RunnableTask for Recorder {
    fn run<'a>(
        &'a self,
        _changes: &'a ChangeSet,
        _update: Updater,
        _options: &'a Value,
    ) -> BoxFuture<'a, anyhow::Result<Option<TaskReport>>> {
        Box::pin(async move {
            self.order.lock().unwrap().push(self.label);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(None)
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

#[tokio::test]
async fn test_zero_sized_pool_is_rejected() {
    assert!(matches!(
        WorkerPool::new(0),
        Err(WatchpipeError::ConfigError(_))
    ));
}

#[tokio::test]
async fn test_pooled_run_relays_updates_and_result() -> TestResult {
    init_tracing();
    let pool = WorkerPool::new(2)?;
    let (runnable, tally) = ScriptedTask::new(Behaviour::Succeed).shared();
    let executor = pooled("lint", runnable, &pool);

    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let updater = Updater::new(move |message| sink.lock().unwrap().push(message));

    let event = with_timeout(executor.run(changed(&["src/main.rs"]), updater)).await;

    match event {
        TaskEvent::Result(report) => {
            assert!(!report.has_errors());
            assert_eq!(report.results.len(), 1);
            assert_eq!(report.results[0]["path"], "src/main.rs");
        }
        other => panic!("expected a result, got {other:?}"),
    }
    assert_eq!(*updates.lock().unwrap(), vec!["run 1 started".to_string()]);
    assert_eq!(tally.runs(), 1);

    pool.terminate_all_workers().await?;
    Ok(())
}

#[tokio::test]
async fn test_tasks_queue_in_fifo_order_when_workers_are_busy() -> TestResult {
    init_tracing();
    let pool = WorkerPool::new(1)?;
    let order = Arc::new(Mutex::new(Vec::new()));
    let make = |label: &'static str| {
        pooled(
            label,
            Arc::new(Recorder {
                label,
                order: Arc::clone(&order),
            }),
            &pool,
        )
    };
    let (a, b, c) = (make("a"), make("b"), make("c"));

    let observer = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.stats().await
    };
    let (ra, rb, rc, stats) = with_timeout(async {
        tokio::join!(
            a.run(changed(&["x"]), Updater::noop()),
            b.run(changed(&["x"]), Updater::noop()),
            c.run(changed(&["x"]), Updater::noop()),
            observer,
        )
    })
    .await;

    for event in [ra, rb, rc] {
        assert!(event.is_success(), "unexpected {event:?}");
    }
    let stats = stats?;
    assert_eq!(stats.busy, 1);
    assert_eq!(stats.queued, 2);
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);

    pool.terminate_all_workers().await?;
    Ok(())
}

#[tokio::test]
async fn test_crashed_worker_is_replaced_and_task_errors_once() -> TestResult {
    init_tracing();
    let pool = WorkerPool::new(2)?;
    let (runnable, tally) = ScriptedTask::new(Behaviour::Panic).shared();
    let executor = pooled("crashy", runnable, &pool);

    let event = with_timeout(executor.run(changed(&["a.txt"]), Updater::noop())).await;
    match event {
        TaskEvent::Error(info) => assert_eq!(info.name, "UnexpectedTaskTerminationError"),
        other => panic!("expected an error event, got {other:?}"),
    }

    let stats = pool.stats().await?;
    assert_eq!(stats.size, 2);
    assert_eq!(stats.idle, 2, "the dead worker should have been replaced");
    assert_eq!(stats.busy, 0);
    assert_eq!(stats.replaced, 1);
    assert_eq!(tally.runs(), 1, "the crashed task must not be resubmitted");

    // The replacement serves new work.
    let (ok, _) = ScriptedTask::new(Behaviour::Succeed).shared();
    let healthy = pooled("healthy", ok, &pool);
    let event = with_timeout(healthy.run(changed(&["b.txt"]), Updater::noop())).await;
    assert!(event.is_success());

    pool.terminate_all_workers().await?;
    Ok(())
}

#[tokio::test]
async fn test_stop_reaches_a_task_on_a_worker() -> TestResult {
    init_tracing();
    let pool = WorkerPool::new(1)?;
    let (runnable, tally) = ScriptedTask::new(Behaviour::BlockUntilStopped).shared();
    let executor = pooled("blocker", runnable, &pool);

    let run = executor.run(changed(&["a.txt"]), Updater::noop());
    let stopper = async {
        tally.wait_for_runs(1).await;
        executor.stop().await
    };
    let (event, stopped) = with_timeout(async { tokio::join!(run, stopper) }).await;

    stopped?;
    assert_eq!(event, TaskEvent::Stop);
    assert_eq!(tally.stops(), 1);

    pool.terminate_all_workers().await?;
    Ok(())
}

#[tokio::test]
async fn test_terminate_settles_running_and_queued_tasks_with_errors() -> TestResult {
    init_tracing();
    let pool = WorkerPool::new(1)?;
    let (running, running_tally) = ScriptedTask::new(Behaviour::BlockUntilStopped).shared();
    let (waiting, waiting_tally) = ScriptedTask::new(Behaviour::Succeed).shared();
    let first = pooled("running", running, &pool);
    let second = pooled("waiting", waiting, &pool);

    let terminator = async {
        running_tally.wait_for_runs(1).await;
        pool.terminate_all_workers().await
    };
    let (first_event, second_event, terminated) = with_timeout(async {
        tokio::join!(
            first.run(changed(&["a.txt"]), Updater::noop()),
            second.run(changed(&["b.txt"]), Updater::noop()),
            terminator,
        )
    })
    .await;

    terminated?;
    for event in [first_event, second_event] {
        match event {
            TaskEvent::Error(info) => assert_eq!(info.name, "UnexpectedTaskTerminationError"),
            other => panic!("expected an error event, got {other:?}"),
        }
    }
    assert_eq!(waiting_tally.runs(), 0);

    // Nothing runs on a terminated pool.
    let (late, late_tally) = ScriptedTask::new(Behaviour::Succeed).shared();
    let late = pooled("late", late, &pool);
    let event = with_timeout(late.run(changed(&["c.txt"]), Updater::noop())).await;
    assert!(matches!(event, TaskEvent::Error(_)));
    assert_eq!(late_tally.runs(), 0);
    Ok(())
}

#[tokio::test]
async fn test_pooled_stop_times_out_and_frees_the_worker() -> TestResult {
    init_tracing();
    let pool = WorkerPool::new(1)?;
    let (task, tally) = ScriptedTask::new(Behaviour::NeverSettle).shared();
    let executor = PooledExecutor::new(
        "stuck",
        task,
        Value::Null,
        Duration::from_millis(100),
        pool.clone(),
    );

    let run = executor.run(changed(&["a.txt"]), Updater::noop());
    let stopper = async {
        tally.wait_for_runs(1).await;
        executor.stop().await
    };
    let (event, stopped) = with_timeout(async { tokio::join!(run, stopper) }).await;

    match stopped {
        Err(WatchpipeError::TaskTerminationTimeout { task, timeout }) => {
            assert_eq!(task, "stuck");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("Expected TaskTerminationTimeout, got: {other:?}"),
    }
    // The worker gives up on the stuck leaf and reports it.
    match event {
        TaskEvent::Error(info) => assert_eq!(info.name, "TaskTerminationTimeoutError"),
        other => panic!("expected an error event, got {other:?}"),
    }
    assert_eq!(tally.stops(), 1);

    // The single worker is free for new work.
    let (next, _) = ScriptedTask::new(Behaviour::Succeed).shared();
    let next = pooled("next", next, &pool);
    assert!(with_timeout(next.run(changed(&["b.txt"]), Updater::noop())).await.is_success());

    pool.terminate_all_workers().await?;
    Ok(())
}
