// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::model::DEFAULT_EXIT_TIMEOUT;
use crate::errors::Result;
use crate::exec::pool::WorkerPool;
use crate::pipeline::scheduler::Scheduler;
use crate::watch::watcher::ChangeSource;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives the scheduler in response to `RuntimeEvent`s.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// restart semantics. This struct handles async IO: reading events from
/// the channel, starting and stopping runs, and the shutdown sequence.
pub struct Runtime {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    scheduler: Arc<Scheduler>,
    source: Arc<dyn ChangeSource>,
    pool: Option<WorkerPool>,
    current_run: Option<JoinHandle<()>>,
    last_success: Option<bool>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("last_success", &self.last_success)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// `event_tx` must feed `event_rx`; run tasks report back through it.
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        scheduler: Arc<Scheduler>,
        source: Arc<dyn ChangeSource>,
        pool: Option<WorkerPool>,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            scheduler,
            source,
            pool,
            current_run: None,
            last_success: None,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core (start/stop runs, clear).
    ///
    /// Returns the result of the last finished run, if any.
    pub async fn run(mut self) -> Result<Option<bool>> {
        info!("watchpipe runtime started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");
            if let RuntimeEvent::RunFinished { success } = event {
                self.last_success = Some(success);
            }

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command);
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        self.close().await?;
        info!("runtime exiting");
        Ok(self.last_success)
    }

    /// Execute a single command from the core.
    fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::StartRun => self.start_run(),
            CoreCommand::StopRun => {
                let scheduler = Arc::clone(&self.scheduler);
                tokio::spawn(async move {
                    if let Err(e) = scheduler.stop().await {
                        warn!(error = %e, "failed to stop run for restart");
                    }
                });
            }
            CoreCommand::ClearChanges => {
                debug!("run succeeded; clearing accumulated changes");
                self.source.clear();
            }
            CoreCommand::RequestExit => {
                info!("core issued RequestExit command");
            }
        }
    }

    fn start_run(&mut self) {
        let changes = self.source.changed_paths();
        let run_number = self.core.state().runs_started;
        info!(run = run_number, changes = changes.len(), "starting pipeline run");

        let scheduler = Arc::clone(&self.scheduler);
        let tx = self.event_tx.clone();
        let handle = tokio::spawn(
            async move {
                let success = match scheduler.run(changes) {
                    Ok(run) => run.await,
                    Err(e) => {
                        error!(error = %e, "could not start pipeline run");
                        false
                    }
                };
                if tx.send(RuntimeEvent::RunFinished { success }).await.is_err() {
                    debug!("runtime gone before run completion was delivered");
                }
            }
            .instrument(info_span!("orchestrated_run", run = run_number)),
        );
        self.current_run = Some(handle);
    }

    /// Shutdown sequence: stop the scheduler, wait for the in-flight run,
    /// close the change source, then release executors and the pool.
    async fn close(&mut self) -> Result<()> {
        info!("shutting down");
        let stopped = self.scheduler.stop().await;
        if let Err(e) = &stopped {
            warn!(error = %e, "scheduler did not stop cleanly");
        }
        if let Some(mut run) = self.current_run.take() {
            if stopped.is_err() {
                // A leaf ignored its stop: terminating the pool settles pooled
                // runs, and anything else gets the exit timeout before the run
                // is abandoned.
                if let Some(pool) = self.pool.take() {
                    pool.terminate_all_workers().await?;
                }
                match tokio::time::timeout(DEFAULT_EXIT_TIMEOUT, &mut run).await {
                    Ok(Err(e)) => warn!(error = %e, "in-flight run ended abnormally"),
                    Ok(Ok(())) => {}
                    Err(_) => {
                        warn!(timeout = ?DEFAULT_EXIT_TIMEOUT, "in-flight run did not settle; abandoning it");
                        run.abort();
                    }
                }
            } else if let Err(e) = run.await {
                warn!(error = %e, "in-flight run ended abnormally");
            }
        }
        self.source.close().await?;
        self.scheduler.shutdown().await?;
        if let Some(pool) = self.pool.take() {
            pool.terminate_all_workers().await?;
        }
        Ok(())
    }
}
