// src/exec/process.rs

//! Executor for `fork = true` tasks: each run is delegated to a child
//! process speaking the line protocol from [`crate::exec::protocol`].

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::errors::{Result, WatchpipeError};
use crate::exec::backend::LeafExecutor;
use crate::exec::gate::RunGate;
use crate::exec::protocol::{Directive, WireEvent, decode_event, encode_line};
use crate::exec::runnable::Updater;
use crate::pipeline::events::TaskEvent;
use crate::types::{BoxFuture, ChangeSet, TaskName};

/// How to launch and talk to a task process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Sent verbatim in the `start` directive.
    pub options: Value,
    /// Keep the child alive between runs.
    pub persistent: bool,
    pub stop_timeout: Duration,
    /// Bound on the ready handshake and on graceful exit.
    pub exit_timeout: Duration,
}

enum Dispatch {
    Sent,
    Stopped,
    Undeliverable,
}

struct ChildSession {
    child: Child,
    directives: mpsc::UnboundedSender<Directive>,
    events: mpsc::UnboundedReceiver<WireEvent>,
    writer: JoinHandle<()>,
}

pub struct ProcessExecutor {
    name: TaskName,
    spec: ProcessSpec,
    session: tokio::sync::Mutex<Option<ChildSession>>,
    control: Mutex<Option<mpsc::UnboundedSender<Directive>>>,
    stop_requested: AtomicBool,
    gate: RunGate,
    span: Span,
}

impl ProcessExecutor {
    pub fn new(name: impl Into<TaskName>, spec: ProcessSpec) -> Self {
        let name = name.into();
        let span = info_span!("process", task = %name);
        Self {
            name,
            spec,
            session: tokio::sync::Mutex::new(None),
            control: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            gate: RunGate::new(),
            span,
        }
    }

    fn control(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Directive>>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn disconnected(&self, reason: &str) -> TaskEvent {
        TaskEvent::Error(
            WatchpipeError::UnexpectedTaskTermination {
                task: self.name.clone(),
                reason: reason.to_string(),
            }
            .into(),
        )
    }

    async fn run_once(&self, changes: ChangeSet, update: Updater) -> TaskEvent {
        self.stop_requested.store(false, Ordering::SeqCst);
        let _settle = self.gate.begin();
        let event = self.drive(changes, &update).await;
        *self.control() = None;
        event
    }

    async fn drive(&self, changes: ChangeSet, update: &Updater) -> TaskEvent {
        let mut slot = self.session.lock().await;
        let mut session = match slot.take() {
            Some(session) => session,
            None => match self.spawn_session().await {
                Ok(session) => session,
                Err(err) => return TaskEvent::Error(err.into()),
            },
        };

        // Publishing the control channel and sending `run` happen under the
        // same lock `stop()` takes, so a stop can never overtake the run.
        let dispatch = {
            let mut control = self.control();
            if self.stop_requested.load(Ordering::SeqCst) {
                Dispatch::Stopped
            } else if session
                .directives
                .send(Directive::Run {
                    changed_paths: changes,
                })
                .is_err()
            {
                Dispatch::Undeliverable
            } else {
                *control = Some(session.directives.clone());
                Dispatch::Sent
            }
        };
        match dispatch {
            Dispatch::Sent => {}
            Dispatch::Stopped => {
                self.park(&mut slot, session).await;
                return TaskEvent::Stop;
            }
            Dispatch::Undeliverable => {
                self.teardown(session).await;
                return self.disconnected("could not deliver run directive");
            }
        }

        let mut healthy = true;
        let event = loop {
            match session.events.recv().await {
                Some(WireEvent::Update { update: message }) => update.update(message),
                Some(WireEvent::Result { result }) => break TaskEvent::Result(result),
                Some(WireEvent::Error { error }) => break TaskEvent::Error(error),
                Some(WireEvent::Stop) => break TaskEvent::Stop,
                Some(WireEvent::Ready) => debug!("ignoring ready event during a run"),
                None => {
                    healthy = false;
                    break self.disconnected("child process closed its output during a run");
                }
            }
        };

        if healthy {
            self.park(&mut slot, session).await;
        } else {
            self.teardown(session).await;
        }

        if healthy && self.stop_requested.load(Ordering::SeqCst) {
            TaskEvent::Stop
        } else {
            event
        }
    }

    /// Keep the session for the next run, or end it.
    async fn park(&self, slot: &mut Option<ChildSession>, session: ChildSession) {
        if self.spec.persistent {
            *slot = Some(session);
        } else {
            self.teardown(session).await;
        }
    }

    async fn spawn_session(&self) -> Result<ChildSession> {
        let program = &self.spec.program;
        let mut cmd = Command::new(program);
        cmd.args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| WatchpipeError::InvalidRunnableTask {
                reference: program.display().to_string(),
                reason: format!("failed to spawn: {e}"),
            })?;
        info!(pid = child.id(), program = %program.display(), "task process started");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("child stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("child stdout was not captured"))?;

        let (directive_tx, mut directive_rx) = mpsc::unbounded_channel::<Directive>();
        let writer = tokio::spawn(
            async move {
                let mut stdin = stdin;
                while let Some(directive) = directive_rx.recv().await {
                    let line = match encode_line(&directive) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(error = %e, "failed to encode directive");
                            continue;
                        }
                    };
                    if let Err(e) = stdin.write_all(line.as_bytes()).await {
                        debug!(error = %e, "child stdin closed");
                        break;
                    }
                    if stdin.flush().await.is_err() {
                        break;
                    }
                }
            }
            .instrument(self.span.clone()),
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel::<WireEvent>();
        tokio::spawn(
            async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match decode_event(&line) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, %line, "ignoring malformed line from task process"),
                    }
                }
            }
            .instrument(self.span.clone()),
        );

        // Always consume stderr so buffers don't fill; log at debug.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(
                async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        debug!("stderr: {}", line);
                    }
                }
                .instrument(self.span.clone()),
            );
        }

        let mut session = ChildSession {
            child,
            directives: directive_tx,
            events: event_rx,
            writer,
        };

        let _ = session.directives.send(Directive::Start {
            options: self.spec.options.clone(),
            stop_timeout_ms: Some(duration_millis(self.spec.stop_timeout)),
        });

        let handshake = tokio::time::timeout(
            self.spec.exit_timeout,
            wait_ready(&self.name, &mut session.events),
        )
        .await;

        match handshake {
            Ok(Ok(())) => {
                debug!("task process ready");
                Ok(session)
            }
            Ok(Err(err)) => {
                self.teardown(session).await;
                Err(err)
            }
            Err(_) => {
                self.teardown(session).await;
                Err(WatchpipeError::DeferredTimeout {
                    operation: format!("ready handshake with task '{}'", self.name),
                    timeout: self.spec.exit_timeout,
                })
            }
        }
    }

    /// Ask the child to exit, close its stdin and give it `exit_timeout`
    /// before killing it.
    async fn teardown(&self, session: ChildSession) {
        let ChildSession {
            mut child,
            directives,
            events,
            writer,
        } = session;

        let _ = directives.send(Directive::Exit);
        drop(directives);
        drop(events);

        match tokio::time::timeout(self.spec.exit_timeout, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "task process exited"),
            Ok(Err(e)) => warn!(error = %e, "failed waiting for task process"),
            Err(_) => {
                warn!(timeout = ?self.spec.exit_timeout, "task process did not exit in time; killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill task process");
                }
            }
        }
        writer.abort();
    }

    async fn stop_once(&self) -> Result<()> {
        if !self.gate.is_running() {
            return Ok(());
        }
        {
            let control = self.control();
            self.stop_requested.store(true, Ordering::SeqCst);
            if let Some(tx) = control.as_ref() {
                let _ = tx.send(Directive::Stop);
            }
        }

        self.gate
            .wait_settled(self.spec.stop_timeout)
            .await
            .map_err(|_| {
                warn!(timeout = ?self.spec.stop_timeout, "task process did not stop in time");
                WatchpipeError::TaskTerminationTimeout {
                    task: self.name.clone(),
                    timeout: self.spec.stop_timeout,
                }
            })
    }

    async fn shutdown_once(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            self.teardown(session).await;
        }
        Ok(())
    }
}

async fn wait_ready(task: &str, events: &mut mpsc::UnboundedReceiver<WireEvent>) -> Result<()> {
    loop {
        match events.recv().await {
            Some(WireEvent::Ready) => return Ok(()),
            Some(other) => debug!(?other, "event before ready; ignoring"),
            None => {
                return Err(WatchpipeError::UnexpectedTaskTermination {
                    task: task.to_string(),
                    reason: "process exited before signalling ready".to_string(),
                });
            }
        }
    }
}

impl LeafExecutor for ProcessExecutor {
    fn run(&self, changes: ChangeSet, update: Updater) -> BoxFuture<'_, TaskEvent> {
        Box::pin(self.run_once(changes, update).instrument(self.span.clone()))
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.stop_once().instrument(self.span.clone()))
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.shutdown_once().instrument(self.span.clone()))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
