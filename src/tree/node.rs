// src/tree/node.rs

use std::fmt;

use indexmap::IndexMap;

use crate::protocol::{Location, Specification, TaskId, TaskMode};

/// Stable handle of a node in a [`TestTree`](crate::tree::TestTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    File,
    Suite,
    Case,
}

impl NodeKind {
    /// Suites and cases are what the worker reports as tasks.
    pub fn is_task(self) -> bool {
        matches!(self, NodeKind::Suite | NodeKind::Case)
    }
}

/// Role of a node in table-driven (parameterized) declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DynamicRole {
    #[default]
    None,
    /// The declaration itself; its label holds placeholders such as `%s`.
    /// Survives recollection even when the worker does not report it.
    Template,
    /// A concrete row discovered at runtime.
    Instance { template: NodeId },
}

/// One failed assertion, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureMessage {
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum NodeStatus {
    #[default]
    Idle,
    Enqueued,
    Started,
    Passed {
        duration_ms: Option<f64>,
    },
    Failed {
        duration_ms: Option<f64>,
        messages: Vec<FailureMessage>,
    },
    Skipped,
}

impl NodeStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, NodeStatus::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct TestNode {
    pub id: NodeId,
    /// Key in the parent's children map.
    pub key: String,
    pub label: String,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: IndexMap<String, NodeId>,
    /// Set on `File` nodes only.
    pub spec: Option<Specification>,
    /// Absolute path of the owning test file; `None` for folders.
    pub file_path: Option<String>,
    pub task_id: Option<TaskId>,
    pub dynamic: DynamicRole,
    pub location: Option<Location>,
    pub tags: Vec<String>,
    pub mode: TaskMode,
    pub status: NodeStatus,
    /// Structural error (collection or hook failure) on a suite or file.
    pub error: Option<String>,
}

impl TestNode {
    pub(crate) fn new(id: NodeId, key: String, label: String, kind: NodeKind) -> Self {
        Self {
            id,
            key,
            label,
            kind,
            parent: None,
            children: IndexMap::new(),
            spec: None,
            file_path: None,
            task_id: None,
            dynamic: DynamicRole::None,
            location: None,
            tags: Vec::new(),
            mode: TaskMode::Run,
            status: NodeStatus::Idle,
            error: None,
        }
    }

    pub fn is_template(&self) -> bool {
        self.dynamic == DynamicRole::Template
    }

    pub fn is_instance(&self) -> bool {
        matches!(self.dynamic, DynamicRole::Instance { .. })
    }
}

/// Change notifications published by the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    Created(NodeId),
    Updated(NodeId),
    Removed(NodeId),
    ResultApplied { node: NodeId, status: NodeStatus },
}
