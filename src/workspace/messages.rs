// src/workspace/messages.rs

use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::Result;
use crate::protocol::{ConsoleLogEntry, Specification, WorkerEvent};
use crate::scheduler::{RequestId, RunOutcome, RunRequest, SessionId, SessionKind};
use crate::tree::{NodeId, TreeEvent, TreeReconciler};
use crate::types::WorkerExit;

/// Read-only access to the tree from outside the actor.
pub type Inspector = Box<dyn FnOnce(&TreeReconciler) + Send>;

/// Requests from a [`WorkspaceHandle`](crate::workspace::WorkspaceHandle).
pub enum WorkspaceCommand {
    RunTests {
        id: RequestId,
        request: RunRequest,
        reply: oneshot::Sender<Result<RunOutcome>>,
    },
    Cancel {
        id: RequestId,
    },
    RefreshFiles {
        reply: oneshot::Sender<Result<usize>>,
    },
    CollectTests {
        specs: Vec<Specification>,
        reply: oneshot::Sender<Result<()>>,
    },
    FilesCreated(Vec<String>),
    FilesChanged(Vec<String>),
    FileRemoved(String),
    Inspect(Inspector),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Everything the workspace actor reacts to.
pub enum WorkspaceMessage {
    Command(WorkspaceCommand),
    /// Forwarded from the transport, in arrival order.
    Worker(WorkerEvent),
    DispatchFinished {
        session: SessionId,
        result: Result<()>,
    },
    CancelAcknowledged {
        session: SessionId,
        result: Result<()>,
    },
    FilesListed {
        reply: oneshot::Sender<Result<usize>>,
        result: Result<Vec<Specification>>,
    },
    CollectFinished {
        reply: oneshot::Sender<Result<()>>,
        result: Result<Value>,
    },
    CoverageCollected {
        session: SessionId,
        result: Result<Option<Value>>,
    },
    WorkerExited(WorkerExit),
}

/// Notifications for whoever presents the workspace.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceEvent {
    Tree(TreeEvent),
    ConsoleOutput {
        node: Option<NodeId>,
        entry: ConsoleLogEntry,
    },
    SessionStarted {
        session: SessionId,
        kind: SessionKind,
    },
    SessionEnded {
        session: SessionId,
    },
    RequestsExhausted,
    UnhandledError(String),
    CoverageReport {
        session: SessionId,
        report: Value,
    },
    CoverageError {
        session: SessionId,
        message: String,
    },
    WorkerExited(WorkerExit),
}
