// src/engine/orchestrator.rs

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions};
use crate::errors::Result;
use crate::exec::pool::WorkerPool;
use crate::pipeline::scheduler::Scheduler;
use crate::watch::watcher::ChangeSource;

/// Handle on a running engine: the runtime loop in a background task plus
/// the sender that feeds it.
#[derive(Debug)]
pub struct Orchestrator {
    tx: mpsc::Sender<RuntimeEvent>,
    handle: JoinHandle<Result<Option<bool>>>,
}

impl Orchestrator {
    /// Spawn the runtime loop. `tx`/`rx` must be the two ends of the same
    /// channel; the change source should already be wired to `tx`.
    pub fn spawn(
        scheduler: Arc<Scheduler>,
        source: Arc<dyn ChangeSource>,
        pool: Option<WorkerPool>,
        options: RuntimeOptions,
        tx: mpsc::Sender<RuntimeEvent>,
        rx: mpsc::Receiver<RuntimeEvent>,
    ) -> Self {
        let runtime = Runtime::new(
            CoreRuntime::new(options),
            rx,
            tx.clone(),
            scheduler,
            source,
            pool,
        );
        let handle = tokio::spawn(runtime.run());
        Self { tx, handle }
    }

    pub fn sender(&self) -> mpsc::Sender<RuntimeEvent> {
        self.tx.clone()
    }

    /// Tell the engine the change source has something new.
    pub async fn notify_changes(&self) -> Result<()> {
        self.tx
            .send(RuntimeEvent::ChangesDetected)
            .await
            .map_err(|_| anyhow!("orchestrator has shut down"))?;
        Ok(())
    }

    /// Wait for the runtime to exit on its own (`--once`, Ctrl-C).
    pub async fn wait(self) -> Result<Option<bool>> {
        self.handle
            .await
            .map_err(|e| anyhow!("runtime task failed: {e}"))?
    }

    /// Stop the active run, wait for it, close the change source and
    /// terminate the worker pool. Returns the last run's result.
    pub async fn close(self) -> Result<Option<bool>> {
        if self.tx.send(RuntimeEvent::ShutdownRequested).await.is_err() {
            debug!("runtime already exited");
        }
        self.wait().await
    }
}
