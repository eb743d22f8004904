// src/protocol/events.rs

//! Worker → controller event surface.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{RelayError, Result};
use crate::protocol::task::{ConsoleLogEntry, RemoteFile, TaskId, TaskResult};

/// One entry of an `onTaskUpdate` batch: `[taskId, result | null]`.
pub type TaskUpdate = (TaskId, Option<TaskResult>);

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    ConsoleLog(ConsoleLogEntry),
    TaskUpdate(Vec<TaskUpdate>),
    Collected {
        file: RemoteFile,
        collecting: bool,
    },
    WatcherStart {
        files: Vec<RemoteFile>,
        errors: Vec<Value>,
        collecting: bool,
    },
    WatcherRerun {
        files: Vec<String>,
        trigger: Option<String>,
        collecting: bool,
    },
    Finished {
        files: Vec<RemoteFile>,
        unhandled_error: Option<String>,
        collecting: bool,
    },
}

impl WorkerEvent {
    pub const CONSOLE_LOG: &'static str = "onConsoleLog";
    pub const TASK_UPDATE: &'static str = "onTaskUpdate";
    pub const COLLECTED: &'static str = "onCollected";
    pub const WATCHER_START: &'static str = "onWatcherStart";
    pub const WATCHER_RERUN: &'static str = "onWatcherRerun";
    pub const FINISHED: &'static str = "onFinished";

    pub const NAMES: [&'static str; 6] = [
        Self::CONSOLE_LOG,
        Self::TASK_UPDATE,
        Self::COLLECTED,
        Self::WATCHER_START,
        Self::WATCHER_RERUN,
        Self::FINISHED,
    ];

    /// Decode an event from its wire name and positional arguments.
    pub fn from_wire(name: &str, args: &[Value]) -> Result<Self> {
        let event = match name {
            Self::CONSOLE_LOG => WorkerEvent::ConsoleLog(arg(args, 0)?),
            Self::TASK_UPDATE => WorkerEvent::TaskUpdate(arg_or_default(args, 0)?),
            Self::COLLECTED => WorkerEvent::Collected {
                file: arg(args, 0)?,
                collecting: arg_or_default(args, 1)?,
            },
            Self::WATCHER_START => WorkerEvent::WatcherStart {
                files: arg_or_default(args, 0)?,
                errors: arg_or_default(args, 1)?,
                collecting: arg_or_default(args, 2)?,
            },
            Self::WATCHER_RERUN => WorkerEvent::WatcherRerun {
                files: arg_or_default(args, 0)?,
                trigger: arg_or_default(args, 1)?,
                collecting: arg_or_default(args, 2)?,
            },
            Self::FINISHED => WorkerEvent::Finished {
                files: arg_or_default(args, 0)?,
                // An empty string means the run had no unhandled error.
                unhandled_error: arg_or_default::<Option<String>>(args, 1)?
                    .filter(|e| !e.is_empty()),
                collecting: arg_or_default(args, 2)?,
            },
            other => {
                return Err(RelayError::Other(anyhow::anyhow!(
                    "unknown worker event `{other}`"
                )));
            }
        };
        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::ConsoleLog(_) => Self::CONSOLE_LOG,
            WorkerEvent::TaskUpdate(_) => Self::TASK_UPDATE,
            WorkerEvent::Collected { .. } => Self::COLLECTED,
            WorkerEvent::WatcherStart { .. } => Self::WATCHER_START,
            WorkerEvent::WatcherRerun { .. } => Self::WATCHER_RERUN,
            WorkerEvent::Finished { .. } => Self::FINISHED,
        }
    }

    /// Encode back into wire arguments (used by fake workers in tests).
    pub fn to_wire(&self) -> Result<Vec<Value>> {
        let args = match self {
            WorkerEvent::ConsoleLog(entry) => vec![serde_json::to_value(entry)?],
            WorkerEvent::TaskUpdate(pairs) => vec![serde_json::to_value(pairs)?],
            WorkerEvent::Collected { file, collecting } => {
                vec![serde_json::to_value(file)?, Value::Bool(*collecting)]
            }
            WorkerEvent::WatcherStart {
                files,
                errors,
                collecting,
            } => vec![
                serde_json::to_value(files)?,
                serde_json::to_value(errors)?,
                Value::Bool(*collecting),
            ],
            WorkerEvent::WatcherRerun {
                files,
                trigger,
                collecting,
            } => vec![
                serde_json::to_value(files)?,
                serde_json::to_value(trigger)?,
                Value::Bool(*collecting),
            ],
            WorkerEvent::Finished {
                files,
                unhandled_error,
                collecting,
            } => vec![
                serde_json::to_value(files)?,
                serde_json::to_value(unhandled_error)?,
                Value::Bool(*collecting),
            ],
        };
        Ok(args)
    }
}

fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(value)?)
}

/// Missing or `null` arguments decode as `T::default()`.
fn arg_or_default<T: DeserializeOwned + Default>(args: &[Value], index: usize) -> Result<T> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => Ok(serde_json::from_value(value.clone())?),
    }
}
