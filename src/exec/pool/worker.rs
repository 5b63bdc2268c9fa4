// src/exec/pool/worker.rs

//! A pool worker: one OS thread with its own single-threaded runtime,
//! serving one task at a time.

use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn};

use crate::errors::{ErrorInfo, WatchpipeError};
use crate::exec::backend::LeafExecutor;
use crate::exec::in_process::InProcessRunner;
use crate::exec::pool::task::{PortDirective, TaskPort, WorkerEvent, WorkerTask};
use crate::exec::pool::{PoolMessage, WorkerId};
use crate::exec::runnable::Updater;
use crate::pipeline::events::TaskEvent;

pub(crate) enum WorkerCommand {
    Init(WorkerTask),
    Exit,
}

/// The pool's handle on one worker thread.
pub(crate) struct WorkerSlot {
    pub(crate) id: WorkerId,
    pub(crate) commands: mpsc::UnboundedSender<WorkerCommand>,
    pub(crate) terminate: CancellationToken,
    pub(crate) thread: Option<thread::JoinHandle<()>>,
}

/// Reports the thread's end to the pool, including when it unwinds.
struct ExitNotice {
    id: WorkerId,
    pool: mpsc::UnboundedSender<PoolMessage>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.pool.send(PoolMessage::Exited {
            worker: self.id,
            panicked: thread::panicking(),
        });
    }
}

pub(crate) fn spawn_worker(
    id: WorkerId,
    pool: mpsc::UnboundedSender<PoolMessage>,
) -> std::io::Result<WorkerSlot> {
    let (commands, rx) = mpsc::unbounded_channel();
    let terminate = CancellationToken::new();
    let token = terminate.clone();

    let thread = thread::Builder::new()
        .name(format!("watchpipe-worker-{id}"))
        .spawn(move || worker_main(id, rx, token, pool))?;

    Ok(WorkerSlot {
        id,
        commands,
        terminate,
        thread: Some(thread),
    })
}

fn worker_main(
    id: WorkerId,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    terminate: CancellationToken,
    pool: mpsc::UnboundedSender<PoolMessage>,
) {
    let _notice = ExitNotice {
        id,
        pool: pool.clone(),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(worker = id, error = %e, "failed to build worker runtime");
            return;
        }
    };

    let span = info_span!("worker", id);
    let _entered = span.enter();
    runtime.block_on(async move {
        loop {
            let command = tokio::select! {
                command = commands.recv() => command,
                _ = terminate.cancelled() => None,
            };
            match command {
                Some(WorkerCommand::Init(task)) => {
                    serve_task(task, &terminate).await;
                    if terminate.is_cancelled() {
                        break;
                    }
                    if pool.send(PoolMessage::Finished { worker: id }).is_err() {
                        break;
                    }
                }
                Some(WorkerCommand::Exit) | None => break,
            }
        }
        debug!("worker exiting");
    });
}

async fn serve_task(task: WorkerTask, terminate: &CancellationToken) {
    let WorkerTask {
        name,
        runnable,
        changes,
        options,
        stop_timeout,
        port,
    } = task;
    let TaskPort {
        mut directives,
        events,
    } = port;

    // A stop that arrived while the task sat in the queue.
    if let Ok(PortDirective::Stop) = directives.try_recv() {
        debug!(task = %name, "stopped before start");
        let _ = events.send(WorkerEvent::Terminal(TaskEvent::Stop));
        return;
    }

    let runner = Arc::new(InProcessRunner::new(
        name.clone(),
        runnable,
        options,
        stop_timeout,
    ));

    let updates = events.clone();
    let updater = Updater::new(move |message| {
        let _ = updates.send(WorkerEvent::Update(message));
    });

    // Stops that time out land here; the stuck run is then dropped so the
    // worker is free again.
    let (stuck_tx, mut stuck_rx) = mpsc::unbounded_channel::<WatchpipeError>();

    let mut run = runner.run(changes, updater);
    let mut listening = true;
    loop {
        tokio::select! {
            event = &mut run => {
                let _ = events.send(WorkerEvent::Terminal(event));
                break;
            }
            directive = directives.recv(), if listening => match directive {
                Some(PortDirective::Stop) => {
                    let runner = Arc::clone(&runner);
                    let stuck = stuck_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = runner.stop().await {
                            let _ = stuck.send(e);
                        }
                    });
                }
                None => listening = false,
            },
            Some(err) = stuck_rx.recv() => {
                warn!(task = %name, error = %err, "task ignored stop; abandoning the run");
                let _ = events.send(WorkerEvent::Terminal(TaskEvent::Error(ErrorInfo::from(err))));
                break;
            }
            _ = terminate.cancelled() => {
                debug!(task = %name, "worker terminated mid-run");
                break;
            }
        }
    }
}
