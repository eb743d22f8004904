// src/workspace/runtime.rs

//! The workspace actor.
//!
//! One task exclusively owns the [`RunScheduler`] and the [`TreeReconciler`].
//! Commands from handles, events forwarded from the transport and
//! completions of RPCs it spawned all arrive on the same channel, so tree
//! updates are applied in the order the worker emitted them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::errors::{RelayError, Result};
use crate::protocol::methods::{paths_args, selection_args};
use crate::protocol::{
    Method, RemoteFile, RemoteTask, Specification, TaskRef, TaskResult, TaskState, WorkerEvent,
};
use crate::scheduler::{
    RequestId, RunOutcome, RunScheduler, SchedulerCommand, SchedulerStep, SessionId, SessionKind,
};
use crate::transport::{ObserverList, SubscriptionId, Transport};
use crate::tree::{NodeId, NodeKind, TrackedFiles, TreeReconciler};

use super::coverage::CoverageReader;
use super::messages::{WorkspaceCommand, WorkspaceEvent, WorkspaceMessage};

pub(crate) struct WorkspaceRuntime {
    scheduler: RunScheduler,
    reconciler: TreeReconciler,
    transport: Transport,
    rx: mpsc::UnboundedReceiver<WorkspaceMessage>,
    tx: mpsc::UnboundedSender<WorkspaceMessage>,
    observers: Arc<ObserverList<WorkspaceEvent>>,
    waiters: HashMap<RequestId, oneshot::Sender<Result<RunOutcome>>>,
    active_cancel: Option<(SessionId, Arc<AtomicBool>)>,
    coverage: Option<Arc<dyn CoverageReader>>,
    subscriptions: Vec<SubscriptionId>,
    tree_subscription: SubscriptionId,
}

impl WorkspaceRuntime {
    pub(crate) fn new(
        transport: Transport,
        root: String,
        coverage: Option<Arc<dyn CoverageReader>>,
        observers: Arc<ObserverList<WorkspaceEvent>>,
        tx: mpsc::UnboundedSender<WorkspaceMessage>,
        rx: mpsc::UnboundedReceiver<WorkspaceMessage>,
    ) -> Self {
        let reconciler = TreeReconciler::new(root);

        let tree_subscription = {
            let observers = Arc::clone(&observers);
            reconciler
                .tree()
                .subscribe(move |event| observers.notify(&WorkspaceEvent::Tree(event.clone())))
        };

        let subscriptions = WorkerEvent::NAMES
            .into_iter()
            .map(|name: &'static str| {
                let tx = tx.clone();
                transport.on(name, move |args| match WorkerEvent::from_wire(name, args) {
                    Ok(event) => {
                        let _ = tx.send(WorkspaceMessage::Worker(event));
                    }
                    Err(err) => warn!(event = %name, error = %err, "undecodable worker event"),
                })
            })
            .collect();

        Self {
            scheduler: RunScheduler::new(),
            reconciler,
            transport,
            rx,
            tx,
            observers,
            waiters: HashMap::new(),
            active_cancel: None,
            coverage,
            subscriptions,
            tree_subscription,
        }
    }

    /// Main event loop; returns after `Shutdown`.
    pub(crate) async fn run(mut self) {
        info!("workspace runtime started");

        while let Some(message) = self.rx.recv().await {
            match message {
                WorkspaceMessage::Command(WorkspaceCommand::Shutdown { reply }) => {
                    self.teardown();
                    let _ = reply.send(());
                    break;
                }
                other => self.handle(other),
            }
        }

        info!("workspace runtime exiting");
    }

    fn handle(&mut self, message: WorkspaceMessage) {
        match message {
            WorkspaceMessage::Command(command) => self.handle_command(command),
            WorkspaceMessage::Worker(event) => self.handle_worker_event(event),
            WorkspaceMessage::DispatchFinished { session, result } => {
                if let Err(err) = &result {
                    warn!(session = %session, error = %err, "run call failed");
                }
                let step = self.scheduler.dispatch_finished(session, result);
                self.execute(step);
            }
            WorkspaceMessage::CancelAcknowledged { session, result } => {
                if let Err(err) = result {
                    debug!(session = %session, error = %err, "cancel call failed; treating run as cancelled");
                }
                let step = self.scheduler.cancel_acknowledged(session);
                self.execute(step);
            }
            WorkspaceMessage::FilesListed { reply, result } => {
                let outcome = result.map(|specs| {
                    self.reconciler.register_files(&specs);
                    specs.len()
                });
                let _ = reply.send(outcome);
            }
            WorkspaceMessage::CollectFinished { reply, result } => {
                let outcome = result.map(|value| {
                    // Workers may return the collected files instead of (or
                    // in addition to) emitting `onCollected`.
                    if let Ok(files) = serde_json::from_value::<Vec<RemoteFile>>(value) {
                        for file in &files {
                            self.collect_and_apply(file);
                        }
                    }
                });
                let _ = reply.send(outcome);
            }
            WorkspaceMessage::CoverageCollected { session, result } => match result {
                Ok(Some(report)) => self.notify(WorkspaceEvent::CoverageReport { session, report }),
                Ok(None) => debug!(session = %session, "worker produced no coverage report"),
                Err(err) => self.notify(WorkspaceEvent::CoverageError {
                    session,
                    message: err.to_string(),
                }),
            },
            WorkspaceMessage::WorkerExited(exit) => {
                info!(?exit, "worker exited");
                self.notify(WorkspaceEvent::WorkerExited(exit));
            }
        }
    }

    fn handle_command(&mut self, command: WorkspaceCommand) {
        match command {
            WorkspaceCommand::RunTests { id, request, reply } => {
                self.waiters.insert(id, reply);
                let step = self.scheduler.submit(id, request);
                self.execute(step);
            }
            WorkspaceCommand::Cancel { id } => {
                let step = self.scheduler.cancel(id);
                self.execute(step);
            }
            WorkspaceCommand::RefreshFiles { reply } => {
                let call = self
                    .transport
                    .call_as::<Vec<Specification>>(Method::GetFiles.as_str(), Vec::new());
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = call.await;
                    let _ = tx.send(WorkspaceMessage::FilesListed { reply, result });
                });
            }
            WorkspaceCommand::CollectTests { specs, reply } => {
                let args = match serde_json::to_value(&specs) {
                    Ok(value) => vec![value],
                    Err(err) => {
                        let _ = reply.send(Err(err.into()));
                        return;
                    }
                };
                let call = self.transport.call(Method::CollectTests.as_str(), args);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = call.await;
                    let _ = tx.send(WorkspaceMessage::CollectFinished { reply, result });
                });
            }
            WorkspaceCommand::FilesCreated(paths) => self.forward_paths(Method::OnFilesCreated, &paths),
            WorkspaceCommand::FilesChanged(paths) => self.forward_paths(Method::OnFilesChanged, &paths),
            WorkspaceCommand::FileRemoved(path) => {
                self.reconciler.remove_file(&path);
            }
            WorkspaceCommand::Inspect(inspector) => inspector(&self.reconciler),
            WorkspaceCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::ConsoleLog(entry) => {
                let node = entry
                    .task_id
                    .as_deref()
                    .and_then(|id| self.reconciler.get_by_task_id(id));
                self.notify(WorkspaceEvent::ConsoleOutput { node, entry });
            }
            WorkerEvent::TaskUpdate(updates) => {
                for (task_id, result) in updates {
                    match self.reconciler.get_by_task_id(&task_id) {
                        Some(node) => {
                            self.reconciler.apply_result(node, result.as_ref());
                        }
                        None => warn!(task_id = %task_id, "result for unknown task ignored"),
                    }
                }
            }
            WorkerEvent::Collected { file, .. } => {
                self.collect_and_apply(&file);
            }
            WorkerEvent::WatcherStart { files, errors, .. } => {
                for file in &files {
                    self.collect_and_apply(file);
                }
                for error in errors {
                    self.notify(WorkspaceEvent::UnhandledError(error_text(&error)));
                }
            }
            WorkerEvent::WatcherRerun { files, trigger, .. } => {
                debug!(files = files.len(), ?trigger, "worker watcher rerun");
                let step = self.scheduler.watch_rerun(files);
                self.execute(step);
            }
            WorkerEvent::Finished {
                files,
                unhandled_error,
                collecting,
            } => {
                for file in &files {
                    self.collect_and_apply(file);
                }
                if let Some(error) = unhandled_error {
                    self.notify(WorkspaceEvent::UnhandledError(error));
                }
                if !collecting {
                    let step = self.scheduler.watch_finished();
                    self.execute(step);
                }
            }
        }
    }

    fn execute(&mut self, step: SchedulerStep) {
        for command in step.commands {
            self.execute_command(command);
        }
    }

    fn execute_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Dispatch {
                session,
                request_id,
                request,
            } => {
                self.notify(WorkspaceEvent::SessionStarted {
                    session,
                    kind: SessionKind::Request(request_id),
                });
                let method = if request.update_snapshots {
                    Method::UpdateSnapshots
                } else {
                    Method::RunTests
                };
                let plan = self.reconciler.dispatch_plan(request.included.as_deref());
                self.mark_enqueued(request.included.as_deref());
                debug!(session = %session, batches = plan.batches.len(), %method, "dispatching");

                let cancelled = Arc::new(AtomicBool::new(false));
                self.active_cancel = Some((session, Arc::clone(&cancelled)));

                // The first call is queued now so it is ordered after any
                // coverage toggle issued in the same step.
                let mut batches = plan.batches.into_iter();
                let first = batches
                    .next()
                    .map(|b| self.call_selection(method, b.specs.as_deref(), b.name_pattern.as_deref()));
                let rest: Vec<_> = batches.collect();
                let transport = self.transport.clone();
                let tx = self.tx.clone();

                tokio::spawn(async move {
                    let result = async {
                        if let Some(first) = first {
                            first.await?;
                        }
                        for batch in rest {
                            if cancelled.load(Ordering::SeqCst) {
                                break;
                            }
                            let args = selection_args(batch.specs.as_deref(), batch.name_pattern.as_deref())?;
                            transport.call(method.as_str(), args).await?;
                        }
                        Ok::<(), RelayError>(())
                    }
                    .await;
                    let _ = tx.send(WorkspaceMessage::DispatchFinished { session, result });
                });
            }
            SchedulerCommand::StartWatchSession { session, files } => {
                debug!(session = %session, files = files.len(), "watch session started");
                self.notify(WorkspaceEvent::SessionStarted {
                    session,
                    kind: SessionKind::Watch,
                });
            }
            SchedulerCommand::Watch { included } => {
                let state = self.reconciler.watch_state(included.as_deref());
                if !state.enabled {
                    self.fire(Method::UnwatchTests, Vec::new());
                    return;
                }
                let specs = match &state.tracked_files {
                    TrackedFiles::All => None,
                    TrackedFiles::Files(files) => Some(files.as_slice()),
                };
                match selection_args(specs, state.name_pattern.as_deref()) {
                    Ok(args) => self.fire(Method::WatchTests, args),
                    Err(err) => warn!(error = %err, "could not encode watch selection"),
                }
            }
            SchedulerCommand::Unwatch => self.fire(Method::UnwatchTests, Vec::new()),
            SchedulerCommand::CancelRun { session } => {
                if let Some((active, flag)) = &self.active_cancel {
                    if *active == session {
                        flag.store(true, Ordering::SeqCst);
                    }
                }
                let call = self.transport.call(Method::CancelRun.as_str(), Vec::new());
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = call.await.map(|_| ());
                    let _ = tx.send(WorkspaceMessage::CancelAcknowledged { session, result });
                });
            }
            SchedulerCommand::EnableCoverage => self.fire(Method::EnableCoverage, Vec::new()),
            SchedulerCommand::DisableCoverage => self.fire(Method::DisableCoverage, Vec::new()),
            SchedulerCommand::CollectCoverage { session } => {
                let call = self
                    .transport
                    .call(Method::WaitForCoverageReport.as_str(), Vec::new());
                let reader = self.coverage.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = match call.await {
                        Ok(Value::String(dir)) => match reader {
                            Some(reader) => read_coverage(reader, PathBuf::from(dir)).await,
                            None => Ok(None),
                        },
                        Ok(_) => Ok(None),
                        Err(err) => Err(err),
                    };
                    let _ = tx.send(WorkspaceMessage::CoverageCollected { session, result });
                });
            }
            SchedulerCommand::Resolve { request_id, result } => {
                match self.waiters.remove(&request_id) {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => debug!(request = %request_id, "no waiter for resolved request"),
                }
            }
            SchedulerCommand::SessionEnded { session } => {
                if self.active_cancel.as_ref().is_some_and(|(s, _)| *s == session) {
                    self.active_cancel = None;
                }
                self.notify(WorkspaceEvent::SessionEnded { session });
            }
            SchedulerCommand::RequestsExhausted => self.notify(WorkspaceEvent::RequestsExhausted),
        }
    }

    fn call_selection(
        &self,
        method: Method,
        specs: Option<&[Specification]>,
        name_pattern: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Value>> + Send + 'static + use<> {
        let queued = selection_args(specs, name_pattern).map(|args| self.transport.call(method.as_str(), args));
        async move {
            match queued {
                Ok(call) => call.await,
                Err(err) => Err(err),
            }
        }
    }

    /// Issue a call whose answer only matters for logging.
    fn fire(&self, method: Method, args: Vec<Value>) {
        let call = self.transport.call(method.as_str(), args);
        tokio::spawn(async move {
            if let Err(err) = call.await {
                warn!(%method, error = %err, "worker call failed");
            }
        });
    }

    fn forward_paths(&self, method: Method, paths: &[String]) {
        match paths_args(paths) {
            Ok(args) => self.fire(method, args),
            Err(err) => warn!(%method, error = %err, "could not encode paths"),
        }
    }

    fn collect_and_apply(&mut self, file: &RemoteFile) {
        let file_node = self.reconciler.collect_file(file);
        if let Some(result) = &file.result {
            self.reconciler.apply_result(file_node, Some(result));
        }
        for task in &file.tasks {
            self.apply_task_results(task);
        }
    }

    fn apply_task_results(&mut self, task: &RemoteTask) {
        if let Some(result) = &task.result {
            match self.reconciler.get_by_task(TaskRef::Task(task)) {
                Some(node) => {
                    self.reconciler.apply_result(node, Some(result));
                }
                None => warn!(task_id = %task.id, "result for unknown task ignored"),
            }
        }
        for child in &task.tasks {
            self.apply_task_results(child);
        }
    }

    /// Show the cases about to run as enqueued.
    fn mark_enqueued(&mut self, included: Option<&[NodeId]>) {
        let roots: Vec<NodeId> = match included {
            Some(ids) => ids.to_vec(),
            None => self.reconciler.tree().roots().collect(),
        };
        let cases: Vec<NodeId> = roots
            .into_iter()
            .flat_map(|id| self.reconciler.tree().subtree(id))
            .filter(|id| {
                self.reconciler
                    .tree()
                    .get(*id)
                    .is_some_and(|n| n.kind == NodeKind::Case && !n.is_template())
            })
            .collect();

        let queued = TaskResult {
            state: TaskState::Queued,
            duration: None,
            errors: Vec::new(),
        };
        for case in cases {
            self.reconciler.apply_result(case, Some(&queued));
        }
    }

    fn notify(&self, event: WorkspaceEvent) {
        self.observers.notify(&event);
    }

    fn teardown(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.transport.off(id);
        }
        self.reconciler.tree().unsubscribe(self.tree_subscription);
        let abandoned = self.waiters.len();
        self.waiters.clear();
        if abandoned > 0 {
            debug!(abandoned, "workspace shut down with runs outstanding");
        }
    }
}

/// Readers do filesystem work, so keep them off the runtime threads.
async fn read_coverage(reader: Arc<dyn CoverageReader>, dir: PathBuf) -> Result<Option<Value>> {
    tokio::task::spawn_blocking(move || reader.read(&dir))
        .await
        .map_err(|err| RelayError::Other(anyhow::anyhow!("coverage reader panicked: {err}")))?
        .map(Some)
}

fn error_text(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}
