// src/tree/projector.rs

use tracing::trace;

use crate::protocol::{ErrorPayload, TaskResult, TaskState};
use crate::tree::arena::TestTree;
use crate::tree::location::find_location;
use crate::tree::node::{FailureMessage, NodeId, NodeKind, NodeStatus, TreeEvent};

/// Applies one task result to the node it was resolved to.
///
/// Only cases carry pass/fail state. Suites and files only pick up (or
/// clear) a structural error annotation; folders are never touched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultProjector;

impl ResultProjector {
    /// Returns `true` if the node changed.
    pub fn apply(tree: &mut TestTree, node: NodeId, result: Option<&TaskResult>) -> bool {
        let Some((kind, file_path)) = tree.get(node).map(|n| (n.kind, n.file_path.clone())) else {
            return false;
        };

        match kind {
            NodeKind::Folder => false,
            NodeKind::Suite | NodeKind::File => Self::apply_structural(tree, node, result),
            NodeKind::Case => {
                let status = case_status(result, file_path.as_deref());
                let Some(target) = tree.get_mut(node) else {
                    return false;
                };
                if target.status == status {
                    return false;
                }
                target.status = status.clone();
                trace!(node = %node, status = ?status, "result applied");
                tree.notify(&TreeEvent::ResultApplied { node, status });
                true
            }
        }
    }

    fn apply_structural(tree: &mut TestTree, node: NodeId, result: Option<&TaskResult>) -> bool {
        let Some(result) = result else {
            return false;
        };
        let Some(target) = tree.get_mut(node) else {
            return false;
        };

        let error = if result.has_errors() {
            Some(
                result
                    .errors
                    .iter()
                    .map(display_message)
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        } else if result.state == TaskState::Pass {
            None
        } else {
            return false;
        };

        if target.error == error {
            return false;
        }
        target.error = error;
        tree.notify(&TreeEvent::Updated(node));
        true
    }
}

fn case_status(result: Option<&TaskResult>, file_path: Option<&str>) -> NodeStatus {
    let Some(result) = result else {
        return NodeStatus::Started;
    };
    match result.state {
        TaskState::Pass => NodeStatus::Passed {
            duration_ms: result.duration,
        },
        TaskState::Fail => NodeStatus::Failed {
            duration_ms: result.duration,
            messages: result
                .errors
                .iter()
                .map(|error| failure_message(error, file_path))
                .collect(),
        },
        TaskState::Skip | TaskState::Todo => NodeStatus::Skipped,
        TaskState::Run | TaskState::Only => NodeStatus::Started,
        TaskState::Queued => NodeStatus::Enqueued,
    }
}

fn failure_message(error: &ErrorPayload, file_path: Option<&str>) -> FailureMessage {
    FailureMessage {
        message: display_message(error),
        expected: error.expected.clone(),
        actual: error.actual.clone(),
        location: file_path.and_then(|path| find_location(error, path)),
    }
}

fn display_message(error: &ErrorPayload) -> String {
    match error.name.as_deref() {
        Some(name) if !name.is_empty() => format!("{name}: {}", error.message),
        _ => error.message.clone(),
    }
}
