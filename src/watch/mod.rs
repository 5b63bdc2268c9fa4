// src/watch/mod.rs

//! File watching and change accumulation.
//!
//! This module is responsible for:
//! - Compiling include / exclude glob patterns ([`patterns`]).
//! - Wiring up a cross-platform filesystem watcher (`notify`) whose events
//!   are debounced and coalesced into a [`ChangeSet`](crate::types::ChangeSet)
//!   ([`watcher`], [`accumulator`]).
//! - Seeding the first run from an initial scan ([`scan`]), or standing in
//!   for the watcher entirely with a fixed snapshot ([`memory`]).
//!
//! It does **not** know about tasks or runs; it only reports that changes
//! are pending and hands out the accumulated set on request.

pub mod accumulator;
pub mod memory;
pub mod path_utils;
pub mod patterns;
pub mod scan;
pub mod watcher;

pub use accumulator::{classify_event, ChangeAccumulator};
pub use memory::SnapshotSource;
pub use patterns::PathFilter;
pub use watcher::{spawn_watcher, ChangeSource, WatchOptions, WatcherHandle};
