// src/tree/mod.rs

//! Persistent, addressable test hierarchy.
//!
//! The worker reports tasks as per-file trees whose ids are only stable for
//! one collection pass. [`TreeReconciler`] maps them onto long-lived nodes in
//! a [`TestTree`] arena, including table-driven instances discovered only at
//! run time, and [`ResultProjector`] applies results to the resolved nodes.

pub mod arena;
pub mod location;
pub mod node;
pub mod pattern;
pub mod projector;
pub mod reconciler;
pub mod selection;

pub use arena::TestTree;
pub use node::{
    DynamicRole, FailureMessage, NodeId, NodeKind, NodeStatus, TestNode, TreeEvent,
};
pub use projector::ResultProjector;
pub use reconciler::TreeReconciler;
pub use selection::{DispatchBatch, DispatchPlan, TrackedFiles, WatchState};
