// src/workspace/mod.rs

//! Per-workspace orchestration.
//!
//! A workspace pairs one worker [`Transport`](crate::transport::Transport)
//! with a [`RunScheduler`](crate::scheduler::RunScheduler) and a
//! [`TreeReconciler`](crate::tree::TreeReconciler), all owned by a single
//! actor task. [`WorkspaceHandle`] is how everything else talks to it.

pub mod coverage;
pub mod handle;
pub mod messages;
mod runtime;

pub use coverage::{CoverageReader, JsonSummaryReader};
pub use handle::{RunTicket, WorkspaceHandle, WorkspaceOptions};
pub use messages::{WorkspaceCommand, WorkspaceEvent, WorkspaceMessage};
