// tests/orchestrator.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use watchpipe::engine::{Orchestrator, RuntimeOptions};
use watchpipe::exec::{PooledExecutor, WorkerPool};
use watchpipe::pipeline::{PipelineNode, Scheduler, TaskNode};
use watchpipe::types::ChangeKind;
use watchpipe::watch::{ChangeSource, PathFilter};
use watchpipe_test_utils::scripted_task::{Behaviour, ScriptedTask, Tally};
use watchpipe_test_utils::{ManualChangeSource, in_process_node, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

struct Harness {
    orchestrator: Orchestrator,
    source: Arc<ManualChangeSource>,
    tally: Arc<Tally>,
}

fn start(behaviour: Behaviour, exit_when_idle: bool, pool: Option<WorkerPool>) -> Harness {
    let (runnable, tally) = ScriptedTask::new(behaviour).shared();
    let node = in_process_node("check", runnable, &[]);
    spawn_with(node, tally, exit_when_idle, pool)
}

/// One task running on `pool` workers with the given stop timeout.
fn start_pooled(behaviour: Behaviour, stop_timeout: Duration, pool: WorkerPool) -> Harness {
    let (runnable, tally) = ScriptedTask::new(behaviour).shared();
    let executor = PooledExecutor::new("check", runnable, Value::Null, stop_timeout, pool.clone());
    let node = Arc::new(TaskNode::new("check", PathFilter::allow_all(), Arc::new(executor)));
    spawn_with(node, tally, false, Some(pool))
}

fn spawn_with(
    node: Arc<TaskNode>,
    tally: Arc<Tally>,
    exit_when_idle: bool,
    pool: Option<WorkerPool>,
) -> Harness {
    let scheduler = Arc::new(Scheduler::new(vec![PipelineNode::Task(node)]));
    let source = Arc::new(ManualChangeSource::new());
    let dyn_source: Arc<dyn ChangeSource> = source.clone();

    let (tx, rx) = mpsc::channel(64);
    let orchestrator = Orchestrator::spawn(
        scheduler,
        dyn_source,
        pool,
        RuntimeOptions { exit_when_idle },
        tx,
        rx,
    );
    Harness {
        orchestrator,
        source,
        tally,
    }
}

#[tokio::test]
async fn test_successful_run_clears_accumulated_changes() -> TestResult {
    init_tracing();
    let h = start(Behaviour::Succeed, true, None);

    h.source.record(ChangeKind::Changed, "src/lib.rs");
    h.orchestrator.notify_changes().await?;
    let outcome = with_timeout(h.orchestrator.wait()).await?;

    assert_eq!(outcome, Some(true));
    assert!(h.source.changed_paths().is_empty());
    assert_eq!(h.tally.seen()[0].changed, vec!["src/lib.rs"]);
    Ok(())
}

#[tokio::test]
async fn test_failed_run_keeps_accumulated_changes() -> TestResult {
    init_tracing();
    let h = start(Behaviour::Fail("nope".into()), true, None);

    h.source.record(ChangeKind::Added, "src/new.rs");
    h.orchestrator.notify_changes().await?;
    let outcome = with_timeout(h.orchestrator.wait()).await?;

    assert_eq!(outcome, Some(false));
    assert_eq!(h.source.changed_paths().added, vec!["src/new.rs"]);
    Ok(())
}

#[tokio::test]
async fn test_change_during_run_restarts_with_everything_accumulated() -> TestResult {
    init_tracing();
    let h = start(Behaviour::Delay(Duration::from_millis(300)), true, None);

    h.source.record(ChangeKind::Changed, "a.txt");
    h.orchestrator.notify_changes().await?;
    with_timeout(h.tally.wait_for_runs(1)).await;

    h.source.record(ChangeKind::Changed, "b.txt");
    h.orchestrator.notify_changes().await?;
    let outcome = with_timeout(h.orchestrator.wait()).await?;

    assert_eq!(outcome, Some(true));
    assert_eq!(h.tally.runs(), 2);
    assert_eq!(h.tally.stops(), 1);
    let seen = h.tally.seen();
    assert_eq!(seen[0].changed, vec!["a.txt"]);
    assert_eq!(seen[1].changed, vec!["a.txt", "b.txt"]);
    assert!(h.source.changed_paths().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_close_stops_the_active_run_and_terminates_the_pool() -> TestResult {
    init_tracing();
    let pool = WorkerPool::new(1)?;
    let h = start(Behaviour::BlockUntilStopped, false, Some(pool.clone()));

    h.source.record(ChangeKind::Changed, "a.txt");
    h.orchestrator.notify_changes().await?;
    with_timeout(h.tally.wait_for_runs(1)).await;

    with_timeout(h.orchestrator.close()).await?;

    assert_eq!(h.tally.stops(), 1);
    assert!(pool.stats().await.is_err(), "pool should be gone after close");
    Ok(())
}

#[tokio::test]
async fn test_changes_during_a_run_coalesce_into_one_restart() -> TestResult {
    init_tracing();
    let h = start(Behaviour::Delay(Duration::from_millis(300)), true, None);

    h.source.record(ChangeKind::Changed, "a.txt");
    h.orchestrator.notify_changes().await?;
    with_timeout(h.tally.wait_for_runs(1)).await;

    // Three notifications land while the first run is still active.
    h.source.record(ChangeKind::Changed, "b.txt");
    h.source.record(ChangeKind::Added, "c.txt");
    for _ in 0..3 {
        h.orchestrator.notify_changes().await?;
    }
    let outcome = with_timeout(h.orchestrator.wait()).await?;

    assert_eq!(outcome, Some(true));
    assert_eq!(h.tally.runs(), 2);
    assert_eq!(h.tally.stops(), 1);
    let seen = h.tally.seen();
    assert_eq!(seen[1].changed, vec!["a.txt", "b.txt"]);
    assert_eq!(seen[1].added, vec!["c.txt"]);
    Ok(())
}

#[tokio::test]
async fn test_close_returns_when_a_pooled_task_ignores_stop() -> TestResult {
    init_tracing();
    let pool = WorkerPool::new(1)?;
    let h = start_pooled(Behaviour::NeverSettle, Duration::from_millis(200), pool.clone());

    h.source.record(ChangeKind::Changed, "a.txt");
    h.orchestrator.notify_changes().await?;
    with_timeout(h.tally.wait_for_runs(1)).await;

    with_timeout(h.orchestrator.close()).await?;

    assert_eq!(h.tally.stops(), 1);
    assert!(pool.stats().await.is_err(), "pool should be gone after close");
    Ok(())
}
