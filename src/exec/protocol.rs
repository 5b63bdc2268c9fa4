// src/exec/protocol.rs

//! Line protocol between the parent and a forked task process.
//!
//! One JSON object per line. The parent writes [`Directive`]s to the
//! child's stdin and reads [`WireEvent`]s from its stdout:
//!
//! ```text
//! parent -> {"directive":"start","options":{...},"stopTimeoutMs":3000}
//! child  -> {"eventType":"ready"}
//! parent -> {"directive":"run","changedPaths":{"added":[],"changed":["a.rs"],"removed":[]}}
//! child  -> {"eventType":"update","update":"checking a.rs"}
//! child  -> {"eventType":"result","result":{"errors":[]}}
//! parent -> {"directive":"exit"}
//! ```
//!
//! A stopped run ends with `{"eventType":"stop"}` instead of a result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ErrorInfo, Result};
use crate::exec::runnable::TaskReport;
use crate::pipeline::events::TaskEvent;
use crate::types::ChangeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "lowercase")]
pub enum Directive {
    Start {
        #[serde(default)]
        options: Value,
        /// The task's configured stop timeout; the child applies the same
        /// bound to its own leaf. Absent means the default.
        #[serde(
            rename = "stopTimeoutMs",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        stop_timeout_ms: Option<u64>,
    },
    Run {
        #[serde(rename = "changedPaths")]
        changed_paths: ChangeSet,
    },
    Stop,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "lowercase")]
pub enum WireEvent {
    Ready,
    Update {
        update: String,
    },
    Result {
        #[serde(default)]
        result: TaskReport,
    },
    Error {
        error: ErrorInfo,
    },
    Stop,
}

impl WireEvent {
    /// Translate a settled run into the event that ends it on the wire.
    pub fn from_terminal(event: TaskEvent) -> Self {
        match event {
            TaskEvent::Result(result) => WireEvent::Result { result },
            TaskEvent::Error(error) => WireEvent::Error { error },
            TaskEvent::Stop => WireEvent::Stop,
            TaskEvent::Update { message } => WireEvent::Update { update: message },
            TaskEvent::Skipped => WireEvent::Result {
                result: TaskReport::success(),
            },
        }
    }
}

/// Serialise one message as a newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_event(line: &str) -> Result<WireEvent> {
    Ok(serde_json::from_str(line.trim())?)
}

pub fn decode_directive(line: &str) -> Result<Directive> {
    Ok(serde_json::from_str(line.trim())?)
}
