// src/scheduler/core.rs

//! Pure run-scheduling state machine.
//!
//! [`RunScheduler`] has no channels, no Tokio types and performs no IO. Each
//! operation updates its state and returns a [`SchedulerStep`] describing what
//! the workspace shell should do next. That keeps the ordering rules (FIFO,
//! watch reruns first, cancel drains, exhaustion) testable without a worker.

use std::collections::VecDeque;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::errors::RelayError;
use crate::scheduler::request::{RequestId, RunOutcome, RunRequest, SessionId, SessionKind};
use crate::tree::NodeId;

/// Instructions for the IO shell, in the order they must be carried out.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Start `runTests` / `updateSnapshots` for a request.
    Dispatch {
        session: SessionId,
        request_id: RequestId,
        request: RunRequest,
    },
    /// A worker-initiated rerun is now the active session.
    StartWatchSession {
        session: SessionId,
        files: Vec<String>,
    },
    /// Send `watchTests` with the coalesced continuous selection.
    Watch { included: Option<Vec<NodeId>> },
    Unwatch,
    CancelRun { session: SessionId },
    EnableCoverage,
    DisableCoverage,
    CollectCoverage { session: SessionId },
    Resolve {
        request_id: RequestId,
        result: Result<RunOutcome, RelayError>,
    },
    SessionEnded { session: SessionId },
    /// Nothing is running, queued or watching any more.
    RequestsExhausted,
}

/// Commands produced by one scheduler operation.
#[derive(Debug, Default)]
pub struct SchedulerStep {
    pub commands: Vec<SchedulerCommand>,
}

impl SchedulerStep {
    fn push(&mut self, command: SchedulerCommand) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Request ids dispatched in this step, in order.
    pub fn dispatched(&self) -> Vec<RequestId> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                SchedulerCommand::Dispatch { request_id, .. } => Some(*request_id),
                _ => None,
            })
            .collect()
    }

    /// Resolutions in this step; `None` marks an error outcome.
    pub fn resolved(&self) -> Vec<(RequestId, Option<RunOutcome>)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                SchedulerCommand::Resolve { request_id, result } => {
                    Some((*request_id, result.as_ref().ok().copied()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn exhausted(&self) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(c, SchedulerCommand::RequestsExhausted))
    }
}

#[derive(Debug)]
struct ActiveSession {
    id: SessionId,
    kind: SessionKind,
    coverage: bool,
    cancel_requested: bool,
}

#[derive(Debug)]
pub struct RunScheduler {
    next_session: u64,
    active: Option<ActiveSession>,
    queue: VecDeque<(RequestId, RunRequest)>,
    continuous: IndexMap<RequestId, Option<Vec<NodeId>>>,
    pending_rerun: Option<Vec<String>>,
    coverage_enabled: bool,
    /// Whether the current "nothing outstanding" period was already announced.
    exhaustion_reported: bool,
}

impl Default for RunScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RunScheduler {
    pub fn new() -> Self {
        Self {
            next_session: 1,
            active: None,
            queue: VecDeque::new(),
            continuous: IndexMap::new(),
            pending_rerun: None,
            coverage_enabled: false,
            exhaustion_reported: true,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn active_session(&self) -> Option<(SessionId, SessionKind)> {
        self.active.as_ref().map(|s| (s.id, s.kind))
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn continuous_len(&self) -> usize {
        self.continuous.len()
    }

    pub fn coverage_enabled(&self) -> bool {
        self.coverage_enabled
    }

    /// Requests still owed an answer plus registered watchers.
    pub fn outstanding(&self) -> usize {
        let active = match &self.active {
            Some(ActiveSession {
                kind: SessionKind::Request(_),
                ..
            }) => 1,
            _ => 0,
        };
        active + self.queue.len() + self.continuous.len()
    }

    /// Accept a run request.
    pub fn submit(&mut self, id: RequestId, request: RunRequest) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        self.exhaustion_reported = false;

        if request.continuous {
            debug!(request = %id, "registering continuous request");
            if request.coverage {
                self.enable_coverage(&mut step);
            }
            self.continuous.insert(id, request.included);
            step.push(SchedulerCommand::Watch {
                included: self.watch_selection(),
            });
            return step;
        }

        if self.active.is_none() && self.pending_rerun.is_none() {
            self.start_request(&mut step, id, request);
        } else {
            debug!(request = %id, queued = self.queue.len() + 1, "run queued");
            self.queue.push_back((id, request));
        }
        step
    }

    /// Cancel a request, whether it is running, queued or continuous.
    pub fn cancel(&mut self, id: RequestId) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if let Some(active) = self.active.as_mut() {
            if active.kind == SessionKind::Request(id) {
                if !active.cancel_requested {
                    info!(request = %id, session = %active.id, "cancelling active run");
                    active.cancel_requested = true;
                    step.push(SchedulerCommand::CancelRun { session: active.id });
                }
                return step;
            }
        }

        if let Some(pos) = self.queue.iter().position(|(queued, _)| *queued == id) {
            self.queue.remove(pos);
            debug!(request = %id, "queued run cancelled");
            step.push(SchedulerCommand::Resolve {
                request_id: id,
                result: Ok(RunOutcome::Cancelled),
            });
            self.check_exhausted(&mut step);
            return step;
        }

        if self.continuous.shift_remove(&id).is_some() {
            debug!(request = %id, "continuous request removed");
            if self.continuous.is_empty() {
                step.push(SchedulerCommand::Unwatch);
            } else {
                step.push(SchedulerCommand::Watch {
                    included: self.watch_selection(),
                });
            }
            step.push(SchedulerCommand::Resolve {
                request_id: id,
                result: Ok(RunOutcome::Unwatched),
            });
            self.check_exhausted(&mut step);
            return step;
        }

        debug!(request = %id, "cancel for unknown request ignored");
        step
    }

    /// The worker answered `cancelRun` for `session`.
    pub fn cancel_acknowledged(&mut self, session: SessionId) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        let Some(active) = self.active.as_ref() else {
            return step;
        };
        if active.id != session {
            return step;
        }
        self.end_active(&mut step, Ok(()));
        self.advance(&mut step);
        self.check_exhausted(&mut step);
        step
    }

    /// The `runTests` / `updateSnapshots` call for `session` returned.
    pub fn dispatch_finished(
        &mut self,
        session: SessionId,
        result: Result<(), RelayError>,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        match self.active.as_ref() {
            Some(active) if active.id == session => {}
            _ => {
                debug!(session = %session, "stale dispatch completion ignored");
                return step;
            }
        }
        self.end_active(&mut step, result);
        self.advance(&mut step);
        self.check_exhausted(&mut step);
        step
    }

    /// The worker's own watcher started a rerun of `files`.
    pub fn watch_rerun(&mut self, files: Vec<String>) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.active.is_none() {
            self.start_watch(&mut step, files);
            return step;
        }

        debug!(files = files.len(), "watch rerun deferred until current session ends");
        let pending = self.pending_rerun.get_or_insert_with(Vec::new);
        for file in files {
            if !pending.contains(&file) {
                pending.push(file);
            }
        }
        step
    }

    /// `onFinished` arrived; ends the active session if it is a watch session.
    pub fn watch_finished(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        match self.active.as_ref() {
            Some(active) if active.kind == SessionKind::Watch => {}
            _ => return step,
        }
        self.end_active(&mut step, Ok(()));
        self.advance(&mut step);
        self.check_exhausted(&mut step);
        step
    }

    fn start_request(&mut self, step: &mut SchedulerStep, id: RequestId, request: RunRequest) {
        if request.coverage {
            self.enable_coverage(step);
        }
        let session = self.next_session_id();
        info!(request = %id, session = %session, "dispatching run");
        self.active = Some(ActiveSession {
            id: session,
            kind: SessionKind::Request(id),
            coverage: request.coverage,
            cancel_requested: false,
        });
        step.push(SchedulerCommand::Dispatch {
            session,
            request_id: id,
            request,
        });
    }

    fn start_watch(&mut self, step: &mut SchedulerStep, files: Vec<String>) {
        let session = self.next_session_id();
        info!(session = %session, files = files.len(), "watch rerun session started");
        self.active = Some(ActiveSession {
            id: session,
            kind: SessionKind::Watch,
            coverage: self.coverage_enabled,
            cancel_requested: false,
        });
        step.push(SchedulerCommand::StartWatchSession { session, files });
    }

    fn end_active(&mut self, step: &mut SchedulerStep, result: Result<(), RelayError>) {
        let Some(active) = self.active.take() else {
            return;
        };

        let cancelled = active.cancel_requested;
        if active.coverage && !cancelled && result.is_ok() {
            step.push(SchedulerCommand::CollectCoverage { session: active.id });
        }
        step.push(SchedulerCommand::SessionEnded { session: active.id });

        if let SessionKind::Request(request_id) = active.kind {
            let result = match result {
                _ if cancelled => Ok(RunOutcome::Cancelled),
                Ok(()) => Ok(RunOutcome::Completed),
                Err(err) => Err(err),
            };
            step.push(SchedulerCommand::Resolve { request_id, result });
        }

        if cancelled {
            let drained: Vec<_> = self.queue.drain(..).collect();
            if !drained.is_empty() {
                info!(skipped = drained.len(), "run cancelled; dropping queued runs");
            }
            for (request_id, _) in drained {
                step.push(SchedulerCommand::Resolve {
                    request_id,
                    result: Ok(RunOutcome::Skipped),
                });
            }
        }
    }

    fn advance(&mut self, step: &mut SchedulerStep) {
        if self.active.is_some() {
            return;
        }
        if let Some(files) = self.pending_rerun.take() {
            self.start_watch(step, files);
            return;
        }
        if let Some((id, request)) = self.queue.pop_front() {
            self.start_request(step, id, request);
        }
    }

    fn check_exhausted(&mut self, step: &mut SchedulerStep) {
        if self.outstanding() > 0 {
            self.exhaustion_reported = false;
            return;
        }
        if self.exhaustion_reported {
            return;
        }
        self.exhaustion_reported = true;
        if self.coverage_enabled {
            self.coverage_enabled = false;
            step.push(SchedulerCommand::DisableCoverage);
        }
        debug!("all run requests settled");
        step.push(SchedulerCommand::RequestsExhausted);
    }

    fn enable_coverage(&mut self, step: &mut SchedulerStep) {
        if !self.coverage_enabled {
            self.coverage_enabled = true;
            step.push(SchedulerCommand::EnableCoverage);
        }
    }

    /// Union of the continuous selections; any "everything" wins.
    fn watch_selection(&self) -> Option<Vec<NodeId>> {
        let mut union: Vec<NodeId> = Vec::new();
        for included in self.continuous.values() {
            let included = included.as_ref()?;
            for node in included {
                if !union.contains(node) {
                    union.push(*node);
                }
            }
        }
        Some(union)
    }

    fn next_session_id(&mut self) -> SessionId {
        let id = SessionId(self.next_session);
        self.next_session += 1;
        id
    }
}
