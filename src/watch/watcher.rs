// src/watch/watcher.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::model::WatcherSection;
use crate::engine::RuntimeEvent;
use crate::types::{BoxFuture, ChangeKind, ChangeSet};
use crate::watch::accumulator::{classify_event, ChangeAccumulator};
use crate::watch::path_utils::relative_str;
use crate::watch::patterns::PathFilter;
use crate::watch::scan::collect_matching_files;

/// What the orchestrator needs from a watcher: the accumulated change set,
/// a way to flush it after a successful run, and shutdown.
pub trait ChangeSource: Send + Sync {
    /// Current accumulated, not-yet-flushed changes.
    fn changed_paths(&self) -> ChangeSet;

    /// Discard accumulated changes.
    fn clear(&self);

    /// Stop watching and release OS resources.
    fn close(&self) -> BoxFuture<'_, crate::errors::Result<()>>;
}

/// Watcher settings derived from `[watcher]`.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub root: PathBuf,
    pub filter: PathFilter,
    pub debounce: Duration,
    pub initial_scan: bool,
}

impl WatchOptions {
    pub fn from_config(root: impl Into<PathBuf>, section: &WatcherSection) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            filter: PathFilter::new(section.include.as_deref(), section.exclude.as_deref())?,
            debounce: section.effective_on_change_timeout(),
            initial_scan: section.initial_run,
        })
    }
}

/// Handle for the filesystem watcher.
///
/// Owns the underlying `RecommendedWatcher` and the accumulated changes.
/// Dropping the handle stops file watching; [`ChangeSource::close`] does the
/// same and also waits for the debounce loop to finish.
pub struct WatcherHandle {
    inner: Mutex<Option<RecommendedWatcher>>,
    accumulator: Arc<Mutex<ChangeAccumulator>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish_non_exhaustive()
    }
}

impl ChangeSource for WatcherHandle {
    fn changed_paths(&self) -> ChangeSet {
        lock(&self.accumulator).snapshot()
    }

    fn clear(&self) {
        lock(&self.accumulator).clear();
    }

    fn close(&self) -> BoxFuture<'_, crate::errors::Result<()>> {
        Box::pin(async move {
            // Dropping the notify watcher drops its callback and with it the
            // event sender, which ends the debounce loop.
            let watcher = self.inner.lock().unwrap_or_else(PoisonError::into_inner).take();
            drop(watcher);

            let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(error = %e, "watcher loop ended abnormally");
                }
            }
            info!("file watcher closed");
            Ok(())
        })
    }
}

/// Spawn a filesystem watcher that observes `options.root` recursively,
/// accumulates matching changes, and sends [`RuntimeEvent::ChangesDetected`]
/// once the debounce quiet period has elapsed.
///
/// With `initial_scan`, every matching file is recorded as added before
/// watching starts and a notification is sent straight away.
pub fn spawn_watcher(
    options: WatchOptions,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> Result<WatcherHandle> {
    let root = options
        .root
        .canonicalize()
        .unwrap_or_else(|_| options.root.clone());

    let accumulator = Arc::new(Mutex::new(ChangeAccumulator::new()));

    if options.initial_scan {
        let files = collect_matching_files(&root, &options.filter)?;
        info!(files = files.len(), "initial scan complete");
        let mut acc = lock(&accumulator);
        for file in files {
            acc.record(ChangeKind::Added, file);
        }
    }

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    // We can't log via tracing here easily, so fallback to stderr.
                    eprintln!("watchpipe: failed to forward notify event: {err}");
                }
            }
            Err(err) => {
                eprintln!("watchpipe: file watch error: {err}");
            }
        },
        Config::default(),
    )?;

    watcher.watch(&root, RecursiveMode::Recursive)?;

    info!("file watcher started on {:?}", root);

    let loop_acc = Arc::clone(&accumulator);
    let filter = options.filter.clone();
    let debounce = options.debounce;
    let seeded = !lock(&accumulator).is_empty();

    let task = tokio::spawn(async move {
        let mut deadline = seeded.then(Instant::now);

        loop {
            tokio::select! {
                maybe_event = event_rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    debug!(?event, "received notify event");
                    if record_event(&root, &filter, &loop_acc, &event) {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    if lock(&loop_acc).is_empty() {
                        continue;
                    }
                    if runtime_tx.send(RuntimeEvent::ChangesDetected).await.is_err() {
                        debug!("runtime channel closed; stopping watcher loop");
                        break;
                    }
                }
            }
        }
        debug!("watcher event loop finished");
    });

    Ok(WatcherHandle {
        inner: Mutex::new(Some(watcher)),
        accumulator,
        task: Mutex::new(Some(task)),
    })
}

/// Record every path of `event` that passes the filter. Returns whether
/// anything was recorded.
fn record_event(
    root: &Path,
    filter: &PathFilter,
    accumulator: &Mutex<ChangeAccumulator>,
    event: &Event,
) -> bool {
    if matches!(event.kind, EventKind::Create(notify::event::CreateKind::Folder)) {
        return false;
    }

    let mut recorded = false;
    for path in event.paths.iter() {
        let Some(rel) = relative_str(root, path) else {
            warn!("could not relativize path {:?} against root {:?}", path, root);
            continue;
        };
        if rel.is_empty() || !filter.matches(&rel) {
            continue;
        }
        if path.is_dir() {
            continue;
        }
        if let Some(kind) = classify_event(&event.kind, || path.exists()) {
            debug!(path = %rel, ?kind, "recording change");
            lock(accumulator).record(kind, rel);
            recorded = true;
        }
    }
    recorded
}

fn lock(acc: &Mutex<ChangeAccumulator>) -> std::sync::MutexGuard<'_, ChangeAccumulator> {
    acc.lock().unwrap_or_else(PoisonError::into_inner)
}
