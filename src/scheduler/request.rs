// src/scheduler/request.rs

use std::fmt;

use crate::tree::NodeId;

/// Caller-chosen id of one run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Id of one live execution on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// What to run and how.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunRequest {
    /// Nodes to run; `None` runs everything.
    pub included: Option<Vec<NodeId>>,
    /// Register for watch mode instead of running once.
    pub continuous: bool,
    pub update_snapshots: bool,
    pub coverage: bool,
}

impl RunRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn nodes(included: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            included: Some(included.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn continuous(mut self) -> Self {
        self.continuous = true;
        self
    }

    pub fn update_snapshots(mut self) -> Self {
        self.update_snapshots = true;
        self
    }

    pub fn with_coverage(mut self) -> Self {
        self.coverage = true;
        self
    }
}

/// Who a session runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Request(RequestId),
    /// Started by the worker's own watcher (`onWatcherRerun`).
    Watch,
}

/// How a request ended, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    /// Dropped from the queue because an earlier run was cancelled.
    Skipped,
    /// A continuous request was unregistered.
    Unwatched,
}
