// src/tree/arena.rs

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::transport::{ObserverList, SubscriptionId};
use crate::tree::node::{NodeId, NodeKind, TestNode, TreeEvent};

/// Arena of test nodes addressed by [`NodeId`].
///
/// Top-level nodes (folders and files directly under the workspace root) live
/// in `roots`; everything else hangs off a parent's `children`. Every
/// structural change is published to subscribers.
#[derive(Debug, Default)]
pub struct TestTree {
    nodes: HashMap<NodeId, TestNode>,
    roots: IndexMap<String, NodeId>,
    next_id: u64,
    observers: ObserverList<TreeEvent>,
}

impl TestTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: NodeId) -> Option<&TestNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut TestNode> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots.values().copied()
    }

    /// Children of `parent`, or the roots for `None`, in discovery order.
    pub fn children(&self, parent: Option<NodeId>) -> Vec<NodeId> {
        match parent {
            None => self.roots.values().copied().collect(),
            Some(id) => self
                .nodes
                .get(&id)
                .map(|n| n.children.values().copied().collect())
                .unwrap_or_default(),
        }
    }

    pub fn child_by_key(&self, parent: Option<NodeId>, key: &str) -> Option<NodeId> {
        match parent {
            None => self.roots.get(key).copied(),
            Some(id) => self.nodes.get(&id)?.children.get(key).copied(),
        }
    }

    /// Find a node by the labels on the path from the roots.
    pub fn find_by_labels(&self, labels: &[&str]) -> Option<NodeId> {
        let mut current: Option<NodeId> = None;
        for label in labels {
            let next = self
                .children(current)
                .into_iter()
                .find(|id| self.nodes.get(id).is_some_and(|n| n.label == *label))?;
            current = Some(next);
        }
        current
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(parent) = current {
            out.push(parent);
            current = self.nodes.get(&parent).and_then(|n| n.parent);
        }
        out
    }

    /// `id` and everything below it, parents before children.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                out.push(next);
                stack.extend(node.children.values().rev().copied());
            }
        }
        out
    }

    /// Nearest ancestor-or-self of the given kind.
    pub fn enclosing(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        let node = self.nodes.get(&id)?;
        if node.kind == kind {
            return Some(id);
        }
        self.ancestors(id)
            .into_iter()
            .find(|a| self.nodes.get(a).is_some_and(|n| n.kind == kind))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestNode> {
        self.nodes.values()
    }

    /// Insert a new node under `parent` (or at the root) keyed by `key`.
    ///
    /// The caller must have checked that `key` is free.
    pub(crate) fn insert(
        &mut self,
        parent: Option<NodeId>,
        key: String,
        label: String,
        kind: NodeKind,
    ) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        let mut node = TestNode::new(id, key.clone(), label, kind);
        node.parent = parent;
        node.file_path = parent
            .and_then(|p| self.nodes.get(&p))
            .and_then(|p| p.file_path.clone());

        match parent {
            None => {
                self.roots.insert(key, id);
            }
            Some(p) => {
                if let Some(parent) = self.nodes.get_mut(&p) {
                    parent.children.insert(key, id);
                }
            }
        }
        self.nodes.insert(id, node);
        id
    }

    /// Remove `id` and its subtree. Returns the removed nodes, parents first.
    pub(crate) fn remove(&mut self, id: NodeId) -> Vec<TestNode> {
        let ids = self.subtree(id);
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let (parent, key) = (node.parent, node.key.clone());

        match parent {
            None => {
                self.roots.shift_remove(&key);
            }
            Some(p) => {
                if let Some(parent) = self.nodes.get_mut(&p) {
                    parent.children.shift_remove(&key);
                }
            }
        }

        let removed: Vec<TestNode> = ids.iter().filter_map(|i| self.nodes.remove(i)).collect();
        for node in &removed {
            self.notify(&TreeEvent::Removed(node.id));
        }
        removed
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TreeEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub(crate) fn notify(&self, event: &TreeEvent) {
        self.observers.notify(event);
    }
}
