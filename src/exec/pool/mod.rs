// src/exec/pool/mod.rs

//! Fixed-size pool of worker threads for in-process tasks.
//!
//! The pool is an actor: one tokio task owns the idle list, the busy map
//! and the FIFO queue, and every interaction is a [`PoolMessage`]. The
//! public [`WorkerPool`] handle is a cheap clone of the actor's sender.
//!
//! A worker that dies mid-task (its thread panicked) is replaced; the task
//! it was running receives exactly one error event and is never resubmitted.

mod task;
mod worker;

use std::collections::{HashMap, VecDeque};
use std::thread;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::model::DEFAULT_EXIT_TIMEOUT;
use crate::errors::{ErrorInfo, Result, WatchpipeError};
use crate::pipeline::events::TaskEvent;
use crate::types::TaskName;

pub use task::{PooledExecutor, WorkerTask};
use task::WorkerEvent;
use worker::{WorkerCommand, WorkerSlot, spawn_worker};

pub type WorkerId = usize;

pub(crate) enum PoolMessage {
    Run(WorkerTask),
    Finished { worker: WorkerId },
    Exited { worker: WorkerId, panicked: bool },
    Stats(oneshot::Sender<PoolStats>),
    Terminate(oneshot::Sender<()>),
}

/// Point-in-time counters, mainly for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub busy: usize,
    pub queued: usize,
    /// Workers replaced after dying mid-task, over the pool's lifetime.
    pub replaced: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<PoolMessage>,
    size: usize,
}

impl WorkerPool {
    /// Start `size` workers. Must be called from within a tokio runtime.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(WatchpipeError::ConfigError(
                "worker pool size must be >= 1".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = PoolState::new(size, tx.clone());
        for _ in 0..size {
            state.spawn_idle()?;
        }
        info!(size, "worker pool started");

        tokio::spawn(state.run(rx).instrument(info_span!("worker_pool")));
        Ok(Self { tx, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Hand a task to an idle worker, or queue it until one frees up.
    pub fn run_task(&self, task: WorkerTask) {
        if let Err(mpsc::error::SendError(PoolMessage::Run(task))) =
            self.tx.send(PoolMessage::Run(task))
        {
            task.reject("worker pool has been terminated");
        }
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PoolMessage::Stats(reply))
            .map_err(|_| anyhow!("worker pool has been terminated"))?;
        Ok(rx.await.map_err(|_| anyhow!("worker pool dropped stats request"))?)
    }

    /// Force-terminate every worker and wait for the threads to exit.
    /// Tasks still queued or running settle with an error.
    pub async fn terminate_all_workers(&self) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(PoolMessage::Terminate(ack)).is_err() {
            debug!("worker pool already terminated");
            return Ok(());
        }
        rx.await
            .map_err(|_| anyhow!("worker pool stopped before acknowledging terminate"))?;
        Ok(())
    }
}

struct BusySlot {
    slot: WorkerSlot,
    task: TaskName,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

struct PoolState {
    size: usize,
    next_id: WorkerId,
    idle: Vec<WorkerSlot>,
    busy: HashMap<WorkerId, BusySlot>,
    queue: VecDeque<WorkerTask>,
    replaced: usize,
    tx: mpsc::UnboundedSender<PoolMessage>,
}

impl PoolState {
    fn new(size: usize, tx: mpsc::UnboundedSender<PoolMessage>) -> Self {
        Self {
            size,
            next_id: 0,
            idle: Vec::with_capacity(size),
            busy: HashMap::new(),
            queue: VecDeque::new(),
            replaced: 0,
            tx,
        }
    }

    fn spawn_idle(&mut self) -> Result<()> {
        let id = self.next_id;
        self.next_id += 1;
        let slot = spawn_worker(id, self.tx.clone())?;
        debug!(worker = id, "worker spawned");
        self.idle.push(slot);
        Ok(())
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PoolMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                PoolMessage::Run(task) => self.submit(task),
                PoolMessage::Finished { worker } => self.release(worker),
                PoolMessage::Exited { worker, panicked } => self.handle_exit(worker, panicked),
                PoolMessage::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                PoolMessage::Terminate(ack) => {
                    self.terminate().await;
                    let _ = ack.send(());
                    break;
                }
            }
        }
        debug!("worker pool actor finished");
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size,
            idle: self.idle.len(),
            busy: self.busy.len(),
            queued: self.queue.len(),
            replaced: self.replaced,
        }
    }

    fn submit(&mut self, task: WorkerTask) {
        match self.idle.pop() {
            Some(slot) => self.dispatch(slot, task),
            None => {
                debug!(task = task.name(), queued = self.queue.len() + 1, "all workers busy; queueing");
                self.queue.push_back(task);
            }
        }
    }

    fn dispatch(&mut self, slot: WorkerSlot, task: WorkerTask) {
        let name = task.name().to_string();
        let events = task.events();
        match slot.commands.send(WorkerCommand::Init(task)) {
            Ok(()) => {
                debug!(worker = slot.id, task = %name, "task dispatched");
                self.busy.insert(
                    slot.id,
                    BusySlot {
                        slot,
                        task: name,
                        events,
                    },
                );
            }
            Err(mpsc::error::SendError(command)) => {
                // The thread is gone; its exit notice will bring a replacement.
                warn!(worker = slot.id, "worker unavailable; requeueing task");
                if let WorkerCommand::Init(task) = command {
                    self.queue.push_front(task);
                }
            }
        }
    }

    fn release(&mut self, worker: WorkerId) {
        if let Some(busy) = self.busy.remove(&worker) {
            debug!(worker, task = %busy.task, "worker released");
            self.idle.push(busy.slot);
        }
        self.dispatch_queued();
    }

    fn dispatch_queued(&mut self) {
        while !self.queue.is_empty() {
            let Some(slot) = self.idle.pop() else { break };
            if let Some(task) = self.queue.pop_front() {
                self.dispatch(slot, task);
            }
        }
    }

    fn handle_exit(&mut self, worker: WorkerId, panicked: bool) {
        if let Some(busy) = self.busy.remove(&worker) {
            error!(worker, task = %busy.task, panicked, "worker died while running a task");
            let failure = WatchpipeError::UnexpectedTaskTermination {
                task: busy.task.clone(),
                reason: if panicked {
                    "worker thread panicked".to_string()
                } else {
                    "worker thread exited".to_string()
                },
            };
            let _ = busy
                .events
                .send(WorkerEvent::Terminal(TaskEvent::Error(ErrorInfo::from(failure))));
        } else {
            // An idle worker died; drop its slot.
            self.idle.retain(|slot| slot.id != worker);
            warn!(worker, panicked, "idle worker exited");
        }

        self.replaced += 1;
        if let Err(e) = self.spawn_idle() {
            error!(error = %e, "failed to spawn replacement worker");
        }
        self.dispatch_queued();
    }

    async fn terminate(&mut self) {
        info!(
            idle = self.idle.len(),
            busy = self.busy.len(),
            queued = self.queue.len(),
            "terminating worker pool"
        );

        for task in self.queue.drain(..) {
            task.reject("worker pool terminated before the task started");
        }

        let mut slots: Vec<WorkerSlot> = self.idle.drain(..).collect();
        for (_, busy) in self.busy.drain() {
            let failure = WatchpipeError::UnexpectedTaskTermination {
                task: busy.task.clone(),
                reason: "worker pool terminated".to_string(),
            };
            let _ = busy
                .events
                .send(WorkerEvent::Terminal(TaskEvent::Error(ErrorInfo::from(failure))));
            slots.push(busy.slot);
        }

        let mut threads: Vec<thread::JoinHandle<()>> = Vec::with_capacity(slots.len());
        for mut slot in slots {
            slot.terminate.cancel();
            let _ = slot.commands.send(WorkerCommand::Exit);
            if let Some(handle) = slot.thread.take() {
                threads.push(handle);
            }
        }

        let join = tokio::task::spawn_blocking(move || {
            for handle in threads {
                let _ = handle.join();
            }
        });
        match tokio::time::timeout(DEFAULT_EXIT_TIMEOUT, join).await {
            Ok(_) => info!("all workers terminated"),
            Err(_) => warn!(timeout = ?DEFAULT_EXIT_TIMEOUT, "some worker threads did not exit in time"),
        }
    }
}
