// src/watch/memory.rs

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{BoxFuture, ChangeKind, ChangeSet};
use crate::watch::accumulator::ChangeAccumulator;
use crate::watch::patterns::PathFilter;
use crate::watch::scan::collect_matching_files;
use crate::watch::watcher::ChangeSource;

/// A change source without a filesystem watcher behind it: changes are
/// recorded by hand, or seeded once from a scan (`--once`).
#[derive(Debug, Default)]
pub struct SnapshotSource {
    accumulator: Mutex<ChangeAccumulator>,
}

impl SnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with every file under `root` accepted by `filter`, as added.
    pub fn scan(root: &Path, filter: &PathFilter) -> anyhow::Result<Self> {
        let source = Self::new();
        for file in collect_matching_files(root, filter)? {
            source.record(ChangeKind::Added, file);
        }
        Ok(source)
    }

    pub fn record(&self, kind: ChangeKind, path: impl Into<String>) {
        self.lock().record(kind, path);
    }

    pub fn record_all(&self, changes: &ChangeSet) {
        let mut acc = self.lock();
        for kind in [ChangeKind::Added, ChangeKind::Changed, ChangeKind::Removed] {
            for path in changes.bucket(kind) {
                acc.record(kind, path.clone());
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChangeAccumulator> {
        self.accumulator.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChangeSource for SnapshotSource {
    fn changed_paths(&self) -> ChangeSet {
        self.lock().snapshot()
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn close(&self) -> BoxFuture<'_, crate::errors::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
