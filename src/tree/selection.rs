// src/tree/selection.rs

//! Turning a set of selected nodes into worker calls.

use indexmap::IndexSet;

use crate::protocol::Specification;
use crate::tree::node::{NodeId, NodeKind};
use crate::tree::pattern::union_patterns;
use crate::tree::reconciler::TreeReconciler;

/// One `runTests` / `updateSnapshots` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchBatch {
    /// `None` runs every file.
    pub specs: Option<Vec<Specification>>,
    pub name_pattern: Option<String>,
}

/// The calls needed to run a selection, in order. Empty when the selection
/// resolves to nothing runnable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DispatchPlan {
    pub batches: Vec<DispatchBatch>,
}

impl DispatchPlan {
    pub fn everything() -> Self {
        Self {
            batches: vec![DispatchBatch {
                specs: None,
                name_pattern: None,
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedFiles {
    All,
    Files(Vec<Specification>),
}

/// Arguments for `watchTests`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchState {
    pub tracked_files: TrackedFiles,
    pub name_pattern: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Default)]
struct Selection {
    whole_files: IndexSet<Specification>,
    test_files: IndexSet<Specification>,
    patterns: IndexSet<String>,
}

impl TreeReconciler {
    /// Expand a selection into worker calls.
    ///
    /// Folders expand to their files. Whole files go into one batch without
    /// a name filter; suites and cases go into a second batch over their
    /// files with the union of their name patterns. Folders themselves are
    /// never sent.
    pub fn dispatch_plan(&self, included: Option<&[NodeId]>) -> DispatchPlan {
        let Some(included) = included else {
            return DispatchPlan::everything();
        };

        let selection = self.select(included);
        let mut plan = DispatchPlan::default();

        if !selection.whole_files.is_empty() {
            plan.batches.push(DispatchBatch {
                specs: Some(selection.whole_files.iter().cloned().collect()),
                name_pattern: None,
            });
        }

        let test_files: Vec<Specification> = selection
            .test_files
            .iter()
            .filter(|spec| !selection.whole_files.contains(*spec))
            .cloned()
            .collect();
        if !test_files.is_empty() {
            plan.batches.push(DispatchBatch {
                specs: Some(test_files),
                name_pattern: union_patterns(&selection.patterns),
            });
        }

        plan
    }

    /// Watch arguments for the coalesced continuous selection.
    ///
    /// When whole files and individual tests are mixed, the whole files win
    /// and no name filter is sent, since `watchTests` takes a single filter.
    pub fn watch_state(&self, included: Option<&[NodeId]>) -> WatchState {
        let Some(included) = included else {
            return WatchState {
                tracked_files: TrackedFiles::All,
                name_pattern: None,
                enabled: true,
            };
        };

        let selection = self.select(included);
        let mut files: IndexSet<Specification> = selection.whole_files.clone();
        files.extend(selection.test_files.iter().cloned());

        let name_pattern = if selection.whole_files.is_empty() {
            union_patterns(&selection.patterns)
        } else {
            None
        };

        WatchState {
            enabled: !files.is_empty(),
            tracked_files: TrackedFiles::Files(files.into_iter().collect()),
            name_pattern,
        }
    }

    fn select(&self, included: &[NodeId]) -> Selection {
        let tree = self.tree();
        let mut selection = Selection::default();

        for id in included {
            let Some(node) = tree.get(*id) else {
                continue;
            };
            match node.kind {
                NodeKind::Folder => {
                    for inner in tree.subtree(*id) {
                        if let Some(spec) = tree.get(inner).and_then(|n| n.spec.clone()) {
                            selection.whole_files.insert(spec);
                        }
                    }
                }
                NodeKind::File => {
                    if let Some(spec) = node.spec.clone() {
                        selection.whole_files.insert(spec);
                    }
                }
                NodeKind::Suite | NodeKind::Case => {
                    let spec = tree
                        .enclosing(*id, NodeKind::File)
                        .and_then(|file| tree.get(file))
                        .and_then(|file| file.spec.clone());
                    if let (Some(spec), Some(pattern)) = (spec, self.name_pattern(*id)) {
                        selection.test_files.insert(spec);
                        selection.patterns.insert(pattern);
                    }
                }
            }
        }

        selection
    }
}
