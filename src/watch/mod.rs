// src/watch/mod.rs

//! File watching collaborator.
//!
//! Turns filesystem changes under the workspace root into
//! `files_created` / `files_changed` / `remove_file` calls on a workspace.
//! It knows nothing about tests; the worker decides what a change means.

pub mod patterns;
pub mod watcher;

pub use patterns::FileMatcher;
pub use watcher::{
    forward_changes, relative_to, spawn_watcher, FileChange, FileChangeKind, WatcherHandle,
};
