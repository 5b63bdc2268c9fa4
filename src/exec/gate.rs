// src/exec/gate.rs

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::error::Elapsed;

/// Tracks whether an executor has a run in flight, so `stop()` can wait for
/// that run to settle.
#[derive(Debug)]
pub struct RunGate {
    running: watch::Sender<bool>,
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RunGate {
    pub fn new() -> Self {
        let (running, _) = watch::channel(false);
        Self { running }
    }

    /// Mark a run as in flight until the returned guard drops.
    pub fn begin(&self) -> GateGuard<'_> {
        self.running.send_replace(true);
        GateGuard { gate: self }
    }

    pub fn settle(&self) {
        self.running.send_replace(false);
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Resolve once no run is in flight, or fail after `timeout`.
    pub async fn wait_settled(&self, timeout: Duration) -> Result<(), Elapsed> {
        let mut rx = self.running.subscribe();
        tokio::time::timeout(timeout, async move {
            // The sender lives in `self`, so this only ends by observing `false`.
            let _ = rx.wait_for(|running| !*running).await;
        })
        .await
    }
}

/// Settles the gate when dropped, including when the run future is
/// cancelled.
#[must_use]
pub struct GateGuard<'a> {
    gate: &'a RunGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.settle();
    }
}
