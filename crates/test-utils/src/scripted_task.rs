#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use watchpipe::errors::ErrorInfo;
use watchpipe::exec::runnable::{RunnableTask, TaskReport, Updater};
use watchpipe::types::{BoxFuture, ChangeSet};

/// What a [`ScriptedTask`] does on every run.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Report one result per changed path.
    Succeed,
    /// Report a failure with this message.
    Fail(String),
    /// Return an `Err` from `run`.
    Error(String),
    /// Sleep, then succeed. Stoppable.
    Delay(Duration),
    /// Sleep, then report a failure. Stoppable.
    FailAfter(Duration, String),
    /// Wait until `stop` is called.
    BlockUntilStopped,
    /// Wait forever; `stop` never completes either.
    NeverSettle,
    /// Panic inside `run`.
    Panic,
}

/// Shared record of what a scripted task saw.
#[derive(Debug, Default)]
pub struct Tally {
    runs: AtomicUsize,
    stops: AtomicUsize,
    seen: Mutex<Vec<ChangeSet>>,
}

impl Tally {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Change sets handed to each run, in order.
    pub fn seen(&self) -> Vec<ChangeSet> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Poll until at least `n` runs have started.
    pub async fn wait_for_runs(&self, n: usize) {
        while self.runs() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// In-memory [`RunnableTask`] whose behaviour is fixed up front.
pub struct ScriptedTask {
    behaviour: Behaviour,
    tally: Arc<Tally>,
    cancel: Mutex<CancellationToken>,
}

impl ScriptedTask {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            tally: Arc::new(Tally::default()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn tally(&self) -> Arc<Tally> {
        self.tally.clone()
    }

    pub fn shared(self) -> (Arc<dyn RunnableTask>, Arc<Tally>) {
        let tally = self.tally();
        (Arc::new(self), tally)
    }

    fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Re-armed after a run so a stop racing the start of a run is not lost.
    fn rearm(&self) {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
    }

    async fn play(
        &self,
        changes: &ChangeSet,
        token: CancellationToken,
    ) -> anyhow::Result<Option<TaskReport>> {
        match &self.behaviour {
            Behaviour::Succeed => Ok(Some(report_paths(changes))),
            Behaviour::Fail(message) => Ok(Some(failure(message))),
            Behaviour::Error(message) => Err(anyhow::anyhow!("{message}")),
            Behaviour::Delay(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => Ok(Some(report_paths(changes))),
                    _ = token.cancelled() => Ok(None),
                }
            }
            Behaviour::FailAfter(delay, message) => {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => Ok(Some(failure(message))),
                    _ = token.cancelled() => Ok(None),
                }
            }
            Behaviour::BlockUntilStopped => {
                token.cancelled().await;
                Ok(None)
            }
            Behaviour::NeverSettle => std::future::pending().await,
            Behaviour::Panic => panic!("scripted panic"),
        }
    }
}

impl RunnableTask for ScriptedTask {
    fn run<'a>(
        &'a self,
        changes: &'a ChangeSet,
        update: Updater,
        _options: &'a Value,
    ) -> BoxFuture<'a, anyhow::Result<Option<TaskReport>>> {
        Box::pin(async move {
            let run = self.tally.runs.fetch_add(1, Ordering::SeqCst) + 1;
            self.tally
                .seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(changes.clone());
            update.update(format!("run {run} started"));

            let token = self.token();
            let outcome = self.play(changes, token).await;
            self.rearm();
            outcome
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.tally.stops.fetch_add(1, Ordering::SeqCst);
            if matches!(self.behaviour, Behaviour::NeverSettle) {
                return std::future::pending().await;
            }
            self.token().cancel();
        })
    }
}

fn report_paths(changes: &ChangeSet) -> TaskReport {
    let results = changes
        .added
        .iter()
        .chain(changes.changed.iter())
        .chain(changes.removed.iter())
        .map(|path| json!({ "path": path }))
        .collect();
    TaskReport::with_results(results)
}

fn failure(message: &str) -> TaskReport {
    TaskReport::failed(vec![ErrorInfo::new("ScriptedFailure", message)])
}
