// src/bin/watchpipe-demo-task.rs

//! A small `fork = true` task served over the child protocol.
//!
//! For every path in the change set it sends an update. Paths containing
//! `fail` are reported as errors. `options.delay_ms` makes each run wait
//! (stoppable) before reporting, and `options.crash_on` exits the process
//! abruptly when a changed path contains that string.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use watchpipe::errors::ErrorInfo;
use watchpipe::exec::child;
use watchpipe::exec::runnable::{RunnableTask, TaskReport, Updater};
use watchpipe::logging;
use watchpipe::types::{BoxFuture, ChangeSet};

#[derive(Debug, Default, Deserialize)]
struct DemoOptions {
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    crash_on: Option<String>,
}

#[derive(Default)]
struct DemoTask {
    cancel: Mutex<CancellationToken>,
}

impl DemoTask {
    fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Swapped after each run, so a stop that lands before the run body
    // starts still cancels it.
    fn rearm(&self) {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
    }
}

impl RunnableTask for DemoTask {
    fn run<'a>(
        &'a self,
        changes: &'a ChangeSet,
        update: Updater,
        options: &'a Value,
    ) -> BoxFuture<'a, anyhow::Result<Option<TaskReport>>> {
        Box::pin(async move {
            let opts: DemoOptions = serde_json::from_value(options.clone()).unwrap_or_default();
            let token = self.token();
            let outcome = self.check(changes, &update, &opts, token).await;
            self.rearm();
            outcome
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.token().cancel() })
    }
}

impl DemoTask {
    async fn check(
        &self,
        changes: &ChangeSet,
        update: &Updater,
        opts: &DemoOptions,
        token: CancellationToken,
    ) -> anyhow::Result<Option<TaskReport>> {
        let paths: Vec<&String> = changes
            .added
            .iter()
            .chain(changes.changed.iter())
            .chain(changes.removed.iter())
            .collect();

        if let Some(marker) = opts.crash_on.as_deref() {
            if paths.iter().any(|p| p.contains(marker)) {
                std::process::exit(3);
            }
        }

        for path in paths.iter() {
            update.update(format!("checked {path}"));
        }

        if opts.delay_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(opts.delay_ms)) => {}
                _ = token.cancelled() => return Ok(None),
            }
        }

        let errors: Vec<ErrorInfo> = paths
            .iter()
            .filter(|p| p.contains("fail"))
            .map(|p| ErrorInfo::new("CheckFailed", format!("{p} failed the check")))
            .collect();

        if errors.is_empty() {
            let results = paths.iter().map(|p| json!({ "path": p })).collect();
            Ok(Some(TaskReport::with_results(results)))
        } else {
            Ok(Some(TaskReport::failed(errors)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging(None)?;
    child::serve(Arc::new(DemoTask::default())).await
}
