// src/watch/accumulator.rs

//! Coalesces raw add/change/remove notifications into a [`ChangeSet`].

use std::collections::BTreeMap;

use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};

use crate::types::{ChangeKind, ChangeSet};

/// Pending, not-yet-flushed changes.
///
/// Each path lives in exactly one bucket; the most recent notification for a
/// path decides which (a remove followed by an add collapses to an add).
#[derive(Debug, Default, Clone)]
pub struct ChangeAccumulator {
    paths: BTreeMap<String, ChangeKind>,
}

impl ChangeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: ChangeKind, path: impl Into<String>) {
        self.paths.insert(path.into(), kind);
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Current accumulated changes. Does not reset anything.
    pub fn snapshot(&self) -> ChangeSet {
        let mut set = ChangeSet::default();
        for (path, kind) in self.paths.iter() {
            let bucket = match kind {
                ChangeKind::Added => &mut set.added,
                ChangeKind::Changed => &mut set.changed,
                ChangeKind::Removed => &mut set.removed,
            };
            bucket.push(path.clone());
        }
        set
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }
}

/// Map a `notify` event kind onto a change bucket.
///
/// `exists` is consulted for renames and ambiguous kinds, where the event
/// alone does not say whether the path is now present. Access events and
/// anything else carrying no content change yield `None`.
pub fn classify_event(kind: &EventKind, exists: impl FnOnce() -> bool) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Added),
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Any => {
            if exists() {
                Some(ChangeKind::Added)
            } else {
                Some(ChangeKind::Removed)
            }
        }
        EventKind::Modify(_) => Some(ChangeKind::Changed),
        EventKind::Access(_) | EventKind::Other => None,
    }
}
