// src/exec/child.rs

//! Child-side harness: serve a [`RunnableTask`] over stdin/stdout so it can
//! be used as a `fork = true` task.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # async fn demo(task: Arc<dyn watchpipe::exec::RunnableTask>) -> anyhow::Result<()> {
//! watchpipe::exec::child::serve(task).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Nothing else may write to stdout while serving; log to stderr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::model::DEFAULT_STOP_TIMEOUT;
use crate::errors::ErrorInfo;
use crate::exec::backend::LeafExecutor;
use crate::exec::in_process::InProcessRunner;
use crate::exec::protocol::{Directive, WireEvent, decode_directive, encode_line};
use crate::exec::runnable::{RunnableTask, Updater};

/// Serve `task` on this process's stdin/stdout until told to exit or
/// stdin closes.
pub async fn serve(task: Arc<dyn RunnableTask>) -> Result<()> {
    serve_io(task, tokio::io::stdin(), tokio::io::stdout()).await
}

/// [`serve`] over arbitrary streams.
pub async fn serve_io<R, W>(task: Arc<dyn RunnableTask>, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireEvent>();
    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(event) = out_rx.recv().await {
            let line = match encode_line(&event) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to encode event");
                    continue;
                }
            };
            if output.write_all(line.as_bytes()).await.is_err() || output.flush().await.is_err() {
                debug!("parent closed our stdout");
                break;
            }
        }
    });

    let mut runner: Option<Arc<InProcessRunner>> = None;
    let mut current: Option<AbortHandle> = None;
    let mut lines = BufReader::new(input).lines();

    while let Some(line) = lines.next_line().await.context("reading directives")? {
        if line.trim().is_empty() {
            continue;
        }
        let directive = match decode_directive(&line) {
            Ok(directive) => directive,
            Err(e) => {
                warn!(error = %e, %line, "ignoring malformed directive");
                continue;
            }
        };

        match directive {
            Directive::Start {
                options,
                stop_timeout_ms,
            } => {
                let stop_timeout = stop_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_STOP_TIMEOUT);
                runner = Some(Arc::new(InProcessRunner::new(
                    "child",
                    Arc::clone(&task),
                    Arc::new(options),
                    stop_timeout,
                )));
                info!(?stop_timeout, "task started");
                let _ = out_tx.send(WireEvent::Ready);
            }
            Directive::Run { changed_paths } => {
                let Some(runner) = runner.clone() else {
                    let _ = out_tx.send(WireEvent::Error {
                        error: ErrorInfo::new("Error", "run directive before start"),
                    });
                    continue;
                };
                let updates = out_tx.clone();
                let updater = Updater::new(move |message| {
                    let _ = updates.send(WireEvent::Update { update: message });
                });
                let run = tokio::spawn(async move { runner.run(changed_paths, updater).await });
                current = Some(run.abort_handle());

                let events = out_tx.clone();
                tokio::spawn(async move {
                    let terminal = match run.await {
                        Ok(event) => WireEvent::from_terminal(event),
                        Err(e) if e.is_cancelled() => return,
                        Err(e) => {
                            warn!(error = %e, "task run panicked");
                            WireEvent::Error {
                                error: ErrorInfo::new(
                                    "UnexpectedTaskTerminationError",
                                    format!("task run panicked: {e}"),
                                ),
                            }
                        }
                    };
                    let _ = events.send(terminal);
                });
            }
            Directive::Stop => {
                if let Some(runner) = runner.clone() {
                    let run = current.clone();
                    let events = out_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = runner.stop().await {
                            // The leaf ignored the stop: drop its run and
                            // report the timeout as the run's terminal event.
                            warn!(error = %e, "stop did not complete; abandoning the run");
                            if let Some(run) = run {
                                run.abort();
                            }
                            let _ = events.send(WireEvent::Error {
                                error: ErrorInfo::from(e),
                            });
                        }
                    });
                }
            }
            Directive::Exit => {
                debug!("exit requested");
                break;
            }
        }
    }

    if let Some(run) = current.take() {
        run.abort();
    }
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
