// src/workspace/handle.rs

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::errors::{RelayError, Result};
use crate::protocol::Specification;
use crate::scheduler::{RequestId, RunOutcome, RunRequest};
use crate::supervisor::WorkerHandle;
use crate::transport::{ObserverList, SubscriptionId, Transport};
use crate::tree::TreeReconciler;

use super::coverage::CoverageReader;
use super::messages::{WorkspaceCommand, WorkspaceEvent, WorkspaceMessage};
use super::runtime::WorkspaceRuntime;

/// Options for [`WorkspaceHandle::spawn_with`].
#[derive(Clone, Default)]
pub struct WorkspaceOptions {
    /// Directory file nodes are shown relative to.
    pub root: String,
    pub coverage: Option<Arc<dyn CoverageReader>>,
}

impl fmt::Debug for WorkspaceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceOptions")
            .field("root", &self.root)
            .field("coverage", &self.coverage.is_some())
            .finish()
    }
}

/// Cheap, cloneable front door to one workspace actor.
#[derive(Clone)]
pub struct WorkspaceHandle {
    tx: mpsc::UnboundedSender<WorkspaceMessage>,
    observers: Arc<ObserverList<WorkspaceEvent>>,
    next_request: Arc<AtomicU64>,
}

impl fmt::Debug for WorkspaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceHandle")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl WorkspaceHandle {
    /// Start a workspace actor talking to the worker behind `transport`.
    pub fn spawn(transport: Transport, root: impl Into<String>) -> Self {
        Self::spawn_with(
            transport,
            WorkspaceOptions {
                root: root.into(),
                coverage: None,
            },
        )
    }

    pub fn spawn_with(transport: Transport, options: WorkspaceOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let observers = Arc::new(ObserverList::new());

        let runtime = WorkspaceRuntime::new(
            transport,
            options.root,
            options.coverage,
            Arc::clone(&observers),
            tx.clone(),
            rx,
        );
        tokio::spawn(runtime.run());

        Self {
            tx,
            observers,
            next_request: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Forward the worker's exit into the workspace's notifications.
    pub fn watch_worker(&self, worker: &WorkerHandle) {
        let worker = worker.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let exit = worker.wait_exit().await;
            let _ = tx.send(WorkspaceMessage::WorkerExited(exit));
        });
    }

    /// Submit a run. The ticket resolves when this request's own session
    /// completes, or when it is cancelled or skipped.
    pub fn run_tests(&self, request: RunRequest) -> RunTicket {
        let id = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        let (reply, rx) = oneshot::channel();
        let sent = self.send(WorkspaceCommand::RunTests { id, request, reply });
        RunTicket {
            id,
            handle: self.clone(),
            rx,
            sent,
        }
    }

    pub fn cancel(&self, id: RequestId) -> Result<()> {
        self.send(WorkspaceCommand::Cancel { id })
    }

    /// Ask the worker for its test files and seed the tree. Returns how many
    /// files it reported.
    pub async fn refresh_files(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkspaceCommand::RefreshFiles { reply })?;
        rx.await.map_err(|_| RelayError::ChannelClosed)?
    }

    /// Ask the worker to collect the given files without running them.
    pub async fn collect(&self, specs: Vec<Specification>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkspaceCommand::CollectTests { specs, reply })?;
        rx.await.map_err(|_| RelayError::ChannelClosed)?
    }

    /// Run `f` against the tree on the actor and return its result.
    pub async fn inspect<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&TreeReconciler) -> R + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(WorkspaceCommand::Inspect(Box::new(move |reconciler| {
            let _ = reply.send(f(reconciler));
        })))?;
        rx.await.map_err(|_| RelayError::ChannelClosed)
    }

    pub fn files_created(&self, paths: Vec<String>) -> Result<()> {
        self.send(WorkspaceCommand::FilesCreated(paths))
    }

    pub fn files_changed(&self, paths: Vec<String>) -> Result<()> {
        self.send(WorkspaceCommand::FilesChanged(paths))
    }

    pub fn remove_file(&self, path: impl Into<String>) -> Result<()> {
        self.send(WorkspaceCommand::FileRemoved(path.into()))
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkspaceEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Stop the actor. Outstanding tickets resolve with `ChannelClosed`.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(WorkspaceCommand::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: WorkspaceCommand) -> Result<()> {
        self.tx
            .send(WorkspaceMessage::Command(command))
            .map_err(|_| RelayError::ChannelClosed)
    }
}

/// A submitted run.
#[derive(Debug)]
pub struct RunTicket {
    id: RequestId,
    handle: WorkspaceHandle,
    rx: oneshot::Receiver<Result<RunOutcome>>,
    sent: Result<()>,
}

impl RunTicket {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn cancel(&self) -> Result<()> {
        self.handle.cancel(self.id)
    }

    pub async fn wait(self) -> Result<RunOutcome> {
        self.sent?;
        self.rx.await.map_err(|_| RelayError::ChannelClosed)?
    }
}
