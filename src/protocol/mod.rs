// src/protocol/mod.rs

//! Wire-level data model shared by the controller and the worker.
//!
//! - [`handshake`] holds the one-time `init` / `ready` messages.
//! - [`methods`] names the RPC surface and builds its positional arguments.
//! - [`events`] decodes worker notifications into [`WorkerEvent`].
//! - [`task`] is the remote task tree (files, suites, tests, results).

pub mod events;
pub mod handshake;
pub mod methods;
pub mod task;

pub use events::{TaskUpdate, WorkerEvent};
pub use handshake::{DebugSetting, InitMessage, InitMeta, ReadyMessage, WorkspaceSource};
pub use methods::Method;
pub use task::{
    ConsoleLogEntry, ErrorPayload, Location, LogStream, RemoteFile, RemoteTask, RemoteTaskKind,
    Specification, StackFrame, TaskId, TaskMode, TaskRef, TaskResult, TaskState,
};
