// src/watch/watcher.rs

use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::errors::Result;
use crate::watch::patterns::FileMatcher;
use crate::workspace::WorkspaceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Changed,
    Removed,
}

/// A filtered filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub kind: FileChangeKind,
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the watched root, forward slashes.
    pub relative: String,
}

/// Keeps the underlying `RecommendedWatcher` alive. Dropping this handle
/// stops file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Watch `root` recursively and send every change whose root-relative path
/// passes `matcher`.
pub fn spawn_watcher(
    root: impl Into<PathBuf>,
    matcher: FileMatcher,
    changes_tx: mpsc::UnboundedSender<FileChange>,
) -> Result<WatcherHandle> {
    let root = root.into();
    let root = root.canonicalize().unwrap_or(root);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

    // Called synchronously by notify; hand everything to the async side.
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = event_tx.send(res);
        },
        Config::default(),
    )
    .map_err(anyhow::Error::from)?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(anyhow::Error::from)?;
    info!(root = %root.display(), "file watcher started");

    tokio::spawn(async move {
        while let Some(res) = event_rx.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "file watch error");
                    continue;
                }
            };
            trace!(?event, "notify event");

            for path in &event.paths {
                let Some(kind) = classify(&event.kind, path) else {
                    continue;
                };
                let Some(relative) = relative_to(&root, path) else {
                    continue;
                };
                if !matcher.matches(&relative) {
                    continue;
                }
                let change = FileChange {
                    kind,
                    path: path.clone(),
                    relative,
                };
                if changes_tx.send(change).is_err() {
                    debug!("file change receiver gone; stopping watcher loop");
                    return;
                }
            }
        }
    });

    Ok(WatcherHandle { _inner: watcher })
}

/// Forward file changes to a workspace until either side goes away.
pub async fn forward_changes(
    mut changes_rx: mpsc::UnboundedReceiver<FileChange>,
    workspace: WorkspaceHandle,
) {
    while let Some(change) = changes_rx.recv().await {
        debug!(kind = ?change.kind, path = %change.relative, "forwarding file change");
        let path = change.path.to_string_lossy().into_owned();
        let sent = match change.kind {
            FileChangeKind::Created => workspace.files_created(vec![path]),
            FileChangeKind::Changed => workspace.files_changed(vec![path]),
            FileChangeKind::Removed => workspace.remove_file(path),
        };
        if sent.is_err() {
            break;
        }
    }
}

fn classify(kind: &EventKind, path: &Path) -> Option<FileChangeKind> {
    match kind {
        EventKind::Create(_) => Some(FileChangeKind::Created),
        EventKind::Remove(_) => Some(FileChangeKind::Removed),
        // Renames arrive as one event per side; whichever side still exists
        // is the new name.
        EventKind::Modify(ModifyKind::Name(_)) => {
            if path.exists() {
                Some(FileChangeKind::Created)
            } else {
                Some(FileChangeKind::Removed)
            }
        }
        EventKind::Modify(_) => Some(FileChangeKind::Changed),
        _ => None,
    }
}

/// Root-relative path with forward slashes, or `None` outside `root`.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok().map(Path::to_path_buf).or_else(|| {
        // Symlinked prefixes (e.g. /private/var on macOS) need both sides
        // canonicalized; a removed path can't be, so this is best effort.
        let root = root.canonicalize().ok()?;
        let path = path.canonicalize().ok()?;
        path.strip_prefix(&root).ok().map(Path::to_path_buf)
    })?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}
