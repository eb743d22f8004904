// src/tree/reconciler.rs

//! Projecting the worker's task trees onto the persistent [`TestTree`].

use std::collections::{HashMap, HashSet, VecDeque};

use regex::Regex;
use tracing::{debug, trace, warn};

use crate::protocol::{
    RemoteFile, RemoteTask, RemoteTaskKind, Specification, TaskId, TaskRef, TaskResult,
};
use crate::tree::arena::TestTree;
use crate::tree::location::normalize_path;
use crate::tree::node::{DynamicRole, NodeId, NodeKind, TreeEvent};
use crate::tree::pattern::{self, Segment};
use crate::tree::projector::ResultProjector;

/// A table-driven task waiting for its template to exist.
struct Deferred<'a> {
    parent: NodeId,
    chain: Vec<String>,
    task: &'a RemoteTask,
}

/// Bookkeeping for one collection pass over one file.
struct Pass<'a> {
    file: NodeId,
    old: HashMap<TaskId, NodeId>,
    mapped: HashMap<TaskId, NodeId>,
    seen: HashSet<NodeId>,
    deferred: VecDeque<Deferred<'a>>,
}

/// Owns the test tree and the task-id index into it.
#[derive(Debug)]
pub struct TreeReconciler {
    tree: TestTree,
    root: String,
    by_task: HashMap<TaskId, NodeId>,
    files: HashMap<Specification, NodeId>,
    file_tasks: HashMap<NodeId, Vec<TaskId>>,
    templates: HashMap<NodeId, (String, Regex)>,
}

impl TreeReconciler {
    /// `root` is the workspace directory file paths are shown relative to.
    pub fn new(root: impl AsRef<str>) -> Self {
        let root = normalize_path(root.as_ref());
        Self {
            tree: TestTree::new(),
            root: root.trim_end_matches('/').to_string(),
            by_task: HashMap::new(),
            files: HashMap::new(),
            file_tasks: HashMap::new(),
            templates: HashMap::new(),
        }
    }

    pub fn tree(&self) -> &TestTree {
        &self.tree
    }

    pub fn get_by_task_id(&self, id: &str) -> Option<NodeId> {
        self.by_task.get(id).copied()
    }

    /// Look up a reported task; file roots fall back to `(project, filepath)`.
    pub fn get_by_task(&self, task: TaskRef<'_>) -> Option<NodeId> {
        match task {
            TaskRef::Task(task) => self.get_by_task_id(&task.id),
            TaskRef::File(file) => self
                .get_by_task_id(&file.id)
                .or_else(|| self.file_node(&file.specification())),
        }
    }

    pub fn file_node(&self, spec: &Specification) -> Option<NodeId> {
        self.files.get(spec).copied()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Apply a reported result to `node`. Returns `true` if it changed.
    pub fn apply_result(&mut self, node: NodeId, result: Option<&TaskResult>) -> bool {
        ResultProjector::apply(&mut self.tree, node, result)
    }

    /// Seed folder and file nodes for the given test files.
    ///
    /// Files already known are left alone. Returns the file nodes in input
    /// order.
    pub fn register_files(&mut self, specs: &[Specification]) -> Vec<NodeId> {
        specs.iter().map(|spec| self.ensure_file(spec)).collect()
    }

    /// Remove the file at `path` (or every file under it, for a directory)
    /// along with its subtree and mappings. Empty folders are pruned.
    ///
    /// Returns the number of file nodes removed.
    pub fn remove_file(&mut self, path: &str) -> usize {
        let target = normalize_path(path);
        let prefix = format!("{}/", target.trim_end_matches('/'));
        let doomed: Vec<NodeId> = self
            .files
            .iter()
            .filter(|(spec, _)| {
                let file = normalize_path(&spec.file);
                file == target || file.starts_with(&prefix)
            })
            .map(|(_, id)| *id)
            .collect();

        for id in &doomed {
            self.remove_file_node(*id);
        }
        if !doomed.is_empty() {
            debug!(path, removed = doomed.len(), "removed test files");
        }
        doomed.len()
    }

    /// Reconcile one file's reported task tree onto its file node.
    ///
    /// Nodes are reused by task id, nodes whose kind changed are replaced,
    /// and anything not reported this time is removed unless it is a dynamic
    /// template. Table-driven instances are placed under their template (or
    /// under the concrete parent instance) by matching their runtime name.
    pub fn collect_file(&mut self, file: &RemoteFile) -> NodeId {
        let spec = file.specification();
        let file_node = self.ensure_file(&spec);

        if let Some(node) = self.tree.get_mut(file_node) {
            node.task_id = Some(file.id.clone());
        }
        self.by_task.insert(file.id.clone(), file_node);

        let old: HashMap<TaskId, NodeId> = self
            .file_tasks
            .remove(&file_node)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| self.by_task.remove(&id).map(|node| (id, node)))
            .collect();

        let mut pass = Pass {
            file: file_node,
            old,
            mapped: HashMap::new(),
            seen: HashSet::new(),
            deferred: VecDeque::new(),
        };

        self.reconcile_tasks(&mut pass, file_node, &file.tasks, &[]);
        while let Some(deferred) = pass.deferred.pop_front() {
            self.resolve_instance(&mut pass, deferred);
        }

        self.prune(&mut pass, file_node, false);

        let ids: Vec<TaskId> = pass.mapped.keys().cloned().collect();
        self.by_task.extend(pass.mapped);
        self.file_tasks.insert(file_node, ids);

        trace!(file = %spec.file, nodes = pass.seen.len(), "file collected");
        file_node
    }

    /// Regex selecting `node` (and, for suites, everything inside it) by
    /// runtime name. `None` for folders and files.
    pub fn name_pattern(&self, node: NodeId) -> Option<String> {
        let target = self.tree.get(node)?;
        if !target.kind.is_task() {
            return None;
        }

        let mut path: Vec<NodeId> = self.tree.ancestors(node);
        path.reverse();
        path.push(node);
        let path: Vec<_> = path
            .into_iter()
            .filter_map(|id| self.tree.get(id))
            .filter(|n| n.kind.is_task())
            .collect();

        let mut segments = Vec::with_capacity(path.len());
        for (i, n) in path.iter().enumerate() {
            let replaced_by_instance = n.is_template()
                && path.get(i + 1).is_some_and(|next| {
                    next.dynamic == DynamicRole::Instance { template: n.id }
                });
            if replaced_by_instance {
                continue;
            }
            if n.is_template() {
                segments.push(Segment::Template(&n.label));
            } else {
                segments.push(Segment::Literal(&n.label));
            }
        }

        Some(pattern::name_pattern(
            &segments,
            target.kind == NodeKind::Case,
        ))
    }

    fn ensure_file(&mut self, spec: &Specification) -> NodeId {
        if let Some(id) = self.files.get(spec) {
            return *id;
        }

        let relative = self.relative_path(&spec.file);
        let mut parts: Vec<&str> = relative.split('/').filter(|p| !p.is_empty()).collect();
        let file_name = parts.pop().unwrap_or(relative.as_str()).to_string();

        let mut parent: Option<NodeId> = None;
        for folder in parts {
            let existing = self
                .tree
                .child_by_key(parent, folder)
                .filter(|id| self.tree.get(*id).is_some_and(|n| n.kind == NodeKind::Folder));
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = self.tree.insert(
                        parent,
                        folder.to_string(),
                        folder.to_string(),
                        NodeKind::Folder,
                    );
                    self.tree.notify(&TreeEvent::Created(id));
                    id
                }
            };
            parent = Some(id);
        }

        let key = if spec.project.is_empty() {
            file_name.clone()
        } else {
            format!("{file_name} [{}]", spec.project)
        };
        let id = self.tree.insert(parent, key.clone(), key, NodeKind::File);
        if let Some(node) = self.tree.get_mut(id) {
            node.spec = Some(spec.clone());
            node.file_path = Some(spec.file.clone());
        }
        self.tree.notify(&TreeEvent::Created(id));
        self.files.insert(spec.clone(), id);
        id
    }

    fn relative_path(&self, file: &str) -> String {
        let file = normalize_path(file);
        if !self.root.is_empty() {
            if let Some(rest) = file.strip_prefix(&format!("{}/", self.root)) {
                return rest.to_string();
            }
        }
        file.trim_start_matches('/').to_string()
    }

    fn remove_file_node(&mut self, file_node: NodeId) {
        for id in self.file_tasks.remove(&file_node).unwrap_or_default() {
            self.by_task.remove(&id);
        }
        let Some(node) = self.tree.get(file_node) else {
            return;
        };
        if let Some(task_id) = node.task_id.clone() {
            self.by_task.remove(&task_id);
        }
        if let Some(spec) = node.spec.clone() {
            self.files.remove(&spec);
        }
        let mut parent = node.parent;

        for removed in self.tree.remove(file_node) {
            self.templates.remove(&removed.id);
        }

        while let Some(folder) = parent {
            let empty_folder = self
                .tree
                .get(folder)
                .is_some_and(|n| n.kind == NodeKind::Folder && n.children.is_empty());
            if !empty_folder {
                break;
            }
            parent = self.tree.get(folder).and_then(|n| n.parent);
            self.tree.remove(folder);
        }
    }

    fn reconcile_tasks<'a>(
        &mut self,
        pass: &mut Pass<'a>,
        parent: NodeId,
        tasks: &'a [RemoteTask],
        chain: &[String],
    ) {
        for task in tasks {
            let mut labels = chain.to_vec();
            labels.push(task.name.clone());

            if task.each {
                pass.deferred.push_back(Deferred {
                    parent,
                    chain: chain.to_vec(),
                    task,
                });
                continue;
            }

            let node = self.reconcile_by_id(pass, parent, task);
            self.reconcile_tasks(pass, node, &task.tasks, &labels);
        }
    }

    fn resolve_instance<'a>(&mut self, pass: &mut Pass<'a>, deferred: Deferred<'a>) {
        let Deferred {
            parent,
            chain,
            task,
        } = deferred;
        if !self.tree.contains(parent) {
            return;
        }

        let mut labels = chain;
        labels.push(task.name.clone());
        let name = pattern::runtime_name(&labels);

        let node = match self.match_template(pass.file, node_kind(task), &name) {
            Some(template) => {
                let parent_is_instance = self.tree.get(parent).is_some_and(|n| n.is_instance());
                let host = if parent_is_instance { parent } else { template };
                self.reconcile_instance(pass, host, template, task)
            }
            None => {
                trace!(task_id = %task.id, name = %name, "no template matches; reconciling by id");
                self.reconcile_by_id(pass, parent, task)
            }
        };

        self.reconcile_tasks(pass, node, &task.tasks, &labels);
    }

    /// First template of the file matching `name`, longest pattern first.
    fn match_template(&self, file: NodeId, kind: NodeKind, name: &str) -> Option<NodeId> {
        let mut candidates: Vec<(NodeId, &str, &Regex)> = self
            .tree
            .subtree(file)
            .into_iter()
            .filter(|id| self.tree.get(*id).is_some_and(|n| n.kind == kind))
            .filter_map(|id| {
                self.templates
                    .get(&id)
                    .map(|(source, re)| (id, source.as_str(), re))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        candidates
            .into_iter()
            .find(|(_, _, re)| re.is_match(name))
            .map(|(id, _, _)| id)
    }

    fn reconcile_by_id(&mut self, pass: &mut Pass<'_>, parent: NodeId, task: &RemoteTask) -> NodeId {
        let kind = node_kind(task);

        let existing = pass
            .old
            .get(&task.id)
            .copied()
            .filter(|id| self.tree.contains(*id))
            .or_else(|| self.tree.child_by_key(Some(parent), &task.id));

        let node = match existing {
            Some(id) if self.fits(id, parent, kind) && !pass.seen.contains(&id) => id,
            Some(id) => {
                debug!(task_id = %task.id, "task kind or position changed; replacing node");
                self.discard(pass, id);
                self.create(parent, task.id.clone(), task, kind)
            }
            None => self.create(parent, task.id.clone(), task, kind),
        };

        let role = if task.dynamic {
            DynamicRole::Template
        } else {
            DynamicRole::None
        };
        self.update_node(node, task, role);
        if task.dynamic {
            self.compile_template(node);
        } else {
            self.templates.remove(&node);
        }

        pass.seen.insert(node);
        pass.mapped.insert(task.id.clone(), node);
        node
    }

    fn reconcile_instance(
        &mut self,
        pass: &mut Pass<'_>,
        host: NodeId,
        template: NodeId,
        task: &RemoteTask,
    ) -> NodeId {
        let kind = node_kind(task);
        let node = match self.tree.child_by_key(Some(host), &task.name) {
            Some(id) if self.fits(id, host, kind) => id,
            Some(id) => {
                self.discard(pass, id);
                self.create(host, task.name.clone(), task, kind)
            }
            None => self.create(host, task.name.clone(), task, kind),
        };

        self.update_node(node, task, DynamicRole::Instance { template });
        pass.seen.insert(node);
        pass.mapped.insert(task.id.clone(), node);
        node
    }

    fn fits(&self, id: NodeId, parent: NodeId, kind: NodeKind) -> bool {
        self.tree
            .get(id)
            .is_some_and(|n| n.kind == kind && n.parent == Some(parent))
    }

    fn create(&mut self, parent: NodeId, key: String, task: &RemoteTask, kind: NodeKind) -> NodeId {
        if self.tree.child_by_key(Some(parent), &key).is_some() {
            warn!(key = %key, "duplicate child key; replacing existing node");
            if let Some(existing) = self.tree.child_by_key(Some(parent), &key) {
                for removed in self.tree.remove(existing) {
                    self.templates.remove(&removed.id);
                }
            }
        }
        let id = self.tree.insert(Some(parent), key, task.name.clone(), kind);
        self.tree.notify(&TreeEvent::Created(id));
        id
    }

    fn update_node(&mut self, id: NodeId, task: &RemoteTask, role: DynamicRole) {
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        let changed = node.label != task.name
            || node.location != task.location
            || node.tags != task.tags
            || node.mode != task.mode
            || node.dynamic != role
            || node.task_id.as_deref() != Some(task.id.as_str());

        node.label = task.name.clone();
        node.location = task.location;
        node.tags = task.tags.clone();
        node.mode = task.mode;
        node.dynamic = role;
        node.task_id = Some(task.id.clone());

        if changed {
            self.tree.notify(&TreeEvent::Updated(id));
        }
    }

    fn compile_template(&mut self, id: NodeId) {
        let Some(source) = self.name_pattern(id) else {
            return;
        };
        if self.templates.get(&id).is_some_and(|(s, _)| *s == source) {
            return;
        }
        match Regex::new(&source) {
            Ok(re) => {
                self.templates.insert(id, (source, re));
            }
            Err(err) => {
                warn!(node = %id, pattern = %source, error = %err, "template pattern does not compile");
                self.templates.remove(&id);
            }
        }
    }

    fn discard(&mut self, pass: &mut Pass<'_>, id: NodeId) {
        let removed = self.tree.remove(id);
        let gone: HashSet<NodeId> = removed.iter().map(|n| n.id).collect();
        for node in &removed {
            self.templates.remove(&node.id);
            pass.seen.remove(&node.id);
        }
        pass.old.retain(|_, n| !gone.contains(n));
        pass.mapped.retain(|_, n| !gone.contains(n));
    }

    /// Drop children not seen in this pass. Templates survive, and so does
    /// the static structure declared inside them. Instances and whatever
    /// hangs below an instance only survive when reported.
    fn prune(&mut self, pass: &mut Pass<'_>, parent: NodeId, inside_template: bool) {
        for child in self.tree.children(Some(parent)) {
            let Some(node) = self.tree.get(child) else {
                continue;
            };
            let keep = pass.seen.contains(&child)
                || node.is_template()
                || (inside_template && !node.is_instance());

            if keep {
                if !pass.seen.contains(&child) {
                    if let Some(task_id) = node.task_id.clone() {
                        pass.mapped.entry(task_id).or_insert(child);
                    }
                }
                let inside = (inside_template || node.is_template()) && !node.is_instance();
                self.prune(pass, child, inside);
            } else {
                trace!(node = %child, label = %node.label, "removing stale node");
                for removed in self.tree.remove(child) {
                    self.templates.remove(&removed.id);
                }
            }
        }
    }
}

fn node_kind(task: &RemoteTask) -> NodeKind {
    match task.kind {
        RemoteTaskKind::Suite => NodeKind::Suite,
        RemoteTaskKind::Test | RemoteTaskKind::Custom => NodeKind::Case,
    }
}
