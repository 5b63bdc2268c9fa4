// src/exec/command.rs

//! Built-in `command` task: run a shell command per pipeline run.
//!
//! ```toml
//! [[tasks]]
//! module = "command"
//! options = { cmd = "cargo check", cwd = "crates/core" }
//! ```
//!
//! The change set is exported as `WATCHPIPE_ADDED`, `WATCHPIPE_CHANGED` and
//! `WATCHPIPE_REMOVED` (newline separated). Each stdout line becomes an
//! update; a non-zero exit becomes a reported error.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::errors::ErrorInfo;
use crate::exec::runnable::{RunnableTask, TaskReport, Updater};
use crate::types::{BoxFuture, ChangeSet};

pub const ADDED_ENV: &str = "WATCHPIPE_ADDED";
pub const CHANGED_ENV: &str = "WATCHPIPE_CHANGED";
pub const REMOVED_ENV: &str = "WATCHPIPE_REMOVED";

#[derive(Debug, Clone, Deserialize)]
pub struct CommandOptions {
    pub cmd: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug)]
pub struct CommandTask {
    options: CommandOptions,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl CommandTask {
    pub fn new(options: CommandOptions) -> Self {
        Self {
            options,
            cancel: Mutex::new(None),
        }
    }

    /// Build from a task's `options` table, which must carry `cmd`.
    pub fn from_options(options: &Value) -> Result<Self> {
        let options: CommandOptions = serde_json::from_value(options.clone())
            .context("the `command` task expects `options = { cmd = \"...\" }`")?;
        if options.cmd.trim().is_empty() {
            anyhow::bail!("the `command` task needs a non-empty `options.cmd`");
        }
        Ok(Self::new(options))
    }

    fn set_cancel(&self, tx: Option<oneshot::Sender<()>>) -> Option<oneshot::Sender<()>> {
        let mut slot = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, tx)
    }
}

impl RunnableTask for CommandTask {
    fn run<'a>(
        &'a self,
        changes: &'a ChangeSet,
        update: Updater,
        _options: &'a Value,
    ) -> BoxFuture<'a, Result<Option<TaskReport>>> {
        Box::pin(async move {
            let (cancel_tx, cancel_rx) = oneshot::channel();
            self.set_cancel(Some(cancel_tx));
            let outcome = run_command(&self.options, changes, update, cancel_rx).await;
            self.set_cancel(None);
            outcome
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(tx) = self.set_cancel(None) {
                let _ = tx.send(());
            }
        })
    }
}

fn shell_command(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

async fn run_command(
    options: &CommandOptions,
    changes: &ChangeSet,
    update: Updater,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<Option<TaskReport>> {
    info!(cmd = %options.cmd, changes = changes.len(), "starting command");

    let mut cmd = shell_command(&options.cmd);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    cmd.env(ADDED_ENV, changes.added.join("\n"))
        .env(CHANGED_ENV, changes.changed.join("\n"))
        .env(REMOVED_ENV, changes.removed.join("\n"))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning `{}`", options.cmd))?;

    let stdout_task = child.stdout.take().map(|stdout| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                update.update(line);
            }
        })
    });

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("waiting for `{}`", options.cmd))?;
            // Drain stdout so every update lands before the result.
            if let Some(task) = stdout_task {
                let _ = task.await;
            }

            let code = status.code().unwrap_or(-1);
            info!(exit_code = code, success = status.success(), "command exited");
            if status.success() {
                Ok(Some(TaskReport::success()))
            } else {
                Ok(Some(TaskReport::failed(vec![ErrorInfo::new(
                    "CommandFailed",
                    format!("`{}` exited with code {code}", options.cmd),
                )])))
            }
        }

        _ = &mut cancel_rx => {
            info!("stop requested; killing command");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill command on stop");
            }
            if let Some(task) = stdout_task {
                task.abort();
            }
            Ok(None)
        }
    }
}
