#![allow(dead_code)]

//! In-memory worker speaking the controller protocol over `Transport::pair`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use testrelay::protocol::{RemoteFile, Specification, WorkerEvent};
use testrelay::transport::{HandlerFuture, RequestHandler, Transport};
use tokio::sync::{Notify, Semaphore};

/// One call the controller made, as the worker saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub args: Vec<Value>,
}

struct WorkerState {
    calls: Mutex<Vec<RecordedCall>>,
    files: Mutex<Vec<RemoteFile>>,
    scripts: Mutex<VecDeque<Vec<WorkerEvent>>>,
    coverage_dir: Mutex<Option<String>>,
    failing: Mutex<Vec<(String, String)>>,
    hold_runs: AtomicBool,
    run_permits: Semaphore,
    call_made: Notify,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            calls: Default::default(),
            files: Default::default(),
            scripts: Default::default(),
            coverage_dir: Default::default(),
            failing: Default::default(),
            hold_runs: Default::default(),
            run_permits: Semaphore::new(0),
            call_made: Default::default(),
        }
    }
}

struct FakeHandler {
    state: Arc<WorkerState>,
    transport: Transport,
}

/// Scriptable worker for exercising the workspace without a real process.
///
/// - `getFiles` answers with the specifications of the configured files.
/// - `collectTests` emits `onCollected` for every requested file it knows.
/// - `runTests` / `updateSnapshots` emit the next scripted batch of events
///   and then answer. With [`FakeWorker::hold_runs`] they first wait for
///   [`FakeWorker::release_run`] or a `cancelRun`.
/// - `waitForCoverageReport` answers with the configured directory or null.
#[derive(Clone)]
pub struct FakeWorker {
    state: Arc<WorkerState>,
    transport: Transport,
}

impl FakeWorker {
    /// Returns the controller-side transport and the worker.
    pub fn connect() -> (Transport, FakeWorker) {
        let (controller, worker) = Transport::pair();
        let state = Arc::new(WorkerState::default());
        worker.serve(FakeHandler {
            state: Arc::clone(&state),
            transport: worker.clone(),
        });
        (
            controller,
            FakeWorker {
                state,
                transport: worker,
            },
        )
    }

    pub fn set_files(&self, files: Vec<RemoteFile>) {
        *lock(&self.state.files) = files;
    }

    /// Queue the events emitted by the next run call.
    pub fn script_run(&self, events: Vec<WorkerEvent>) {
        lock(&self.state.scripts).push_back(events);
    }

    pub fn hold_runs(&self) {
        self.state.hold_runs.store(true, Ordering::SeqCst);
    }

    /// Let one held run proceed.
    pub fn release_run(&self) {
        self.state.run_permits.add_permits(1);
    }

    pub fn set_coverage_dir(&self, dir: &str) {
        *lock(&self.state.coverage_dir) = Some(dir.to_string());
    }

    /// Make every call to `method` answer with a remote error.
    pub fn fail_method(&self, method: &str, message: &str) {
        lock(&self.state.failing).push((method.to_string(), message.to_string()));
    }

    pub fn emit(&self, event: &WorkerEvent) {
        let args = event.to_wire().expect("event encodes");
        self.transport
            .emit(event.name(), args)
            .expect("worker transport open");
    }

    pub fn disconnect(&self) {
        self.transport.close();
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.state.calls).clone()
    }

    pub fn method_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.method).collect()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .map(|c| c.args)
            .collect()
    }

    /// Wait until `method` has been called at least `count` times.
    pub async fn wait_for_calls(&self, method: &str, count: usize) {
        loop {
            let notified = self.state.call_made.notified();
            if self.calls_to(method).len() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl RequestHandler for FakeHandler {
    fn handle(&self, method: String, args: Vec<Value>) -> HandlerFuture {
        let state = Arc::clone(&self.state);
        let transport = self.transport.clone();

        lock(&state.calls).push(RecordedCall {
            method: method.clone(),
            args: args.clone(),
        });
        state.call_made.notify_waiters();

        Box::pin(async move {
            let failure = lock(&state.failing)
                .iter()
                .find(|(m, _)| *m == method)
                .map(|(_, message)| message.clone());
            if let Some(message) = failure {
                return Err(message);
            }

            match method.as_str() {
                "getFiles" => {
                    let specs: Vec<Specification> = lock(&state.files)
                        .iter()
                        .map(RemoteFile::specification)
                        .collect();
                    serde_json::to_value(specs).map_err(|e| e.to_string())
                }
                "collectTests" => {
                    let wanted: Vec<Specification> = args
                        .first()
                        .cloned()
                        .map(serde_json::from_value)
                        .transpose()
                        .map_err(|e| e.to_string())?
                        .unwrap_or_default();
                    let files: Vec<RemoteFile> = lock(&state.files)
                        .iter()
                        .filter(|f| wanted.contains(&f.specification()))
                        .cloned()
                        .collect();
                    for file in files {
                        send(
                            &transport,
                            &WorkerEvent::Collected {
                                file,
                                collecting: true,
                            },
                        )?;
                    }
                    Ok(Value::Null)
                }
                "runTests" | "updateSnapshots" => {
                    if state.hold_runs.load(Ordering::SeqCst) {
                        let permit = state
                            .run_permits
                            .acquire()
                            .await
                            .map_err(|e| e.to_string())?;
                        permit.forget();
                    }
                    let script = lock(&state.scripts).pop_front().unwrap_or_default();
                    for event in &script {
                        send(&transport, event)?;
                    }
                    Ok(Value::Null)
                }
                "cancelRun" => {
                    state.run_permits.add_permits(1);
                    Ok(Value::Null)
                }
                "waitForCoverageReport" => Ok(lock(&state.coverage_dir)
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null)),
                _ => Ok(Value::Null),
            }
        })
    }
}

fn send(transport: &Transport, event: &WorkerEvent) -> Result<(), String> {
    let args = event.to_wire().map_err(|e| e.to_string())?;
    transport.emit(event.name(), args).map_err(|e| e.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
