// src/supervisor/mod.rs

//! Lifecycle of one worker: launch, handshake, health, teardown.
//!
//! [`ProcessSupervisor::start`] launches the worker according to its
//! [`LaunchMode`], sends `init`, waits for `ready` and hands back a
//! [`WorkerHandle`] wrapping the live [`Transport`].

pub mod handshake;
pub mod launch;
mod monitor;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, SupervisorConfig, WorkerConfig};
use crate::errors::Result;
use crate::protocol::{DebugSetting, InitMessage, InitMeta, Method, WorkspaceSource};
use crate::util::lock;
use crate::transport::{Frame, FrameReader, FrameWriter, Transport};
use crate::types::{LaunchMode, WorkerExit};

pub use launch::ADDRESS_ENV;

/// What the worker told us in its `ready` message, plus process facts.
#[derive(Debug, Clone)]
pub struct WorkerMetadata {
    pub configs: Vec<String>,
    pub workspace_source: WorkspaceSource,
    pub capabilities: BTreeMap<String, Value>,
    pub pid: Option<u32>,
    pub mode: LaunchMode,
}

#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    worker: WorkerConfig,
    settings: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(worker: WorkerConfig, settings: SupervisorConfig) -> Self {
        Self { worker, settings }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(cfg.worker.clone(), cfg.supervisor)
    }

    /// The `init` frame sent right after launch.
    pub fn init_message(&self) -> InitMessage {
        InitMessage {
            meta: InitMeta {
                cwd: self.worker.cwd.to_string_lossy().into_owned(),
                config_file: self.worker.config_file.clone(),
                workspace_file: self.worker.workspace_file.clone(),
                env: self.worker.env.clone(),
                arguments: self.worker.arguments.clone(),
            },
            debug: DebugSetting::Enabled(self.worker.debug),
            ast_collect: self.worker.ast_collect,
        }
    }

    /// Launch the worker and wait for its readiness handshake.
    pub async fn start(&self) -> Result<WorkerHandle> {
        info!(
            mode = ?self.worker.mode,
            command = ?self.worker.command,
            cwd = %self.worker.cwd.display(),
            "starting worker"
        );

        let launched = launch::launch(&self.worker).await?;
        let pid = launched.pid();
        let mut child = launched.child;
        let mut reader = FrameReader::new(launched.reader);
        let mut writer = FrameWriter::new(launched.writer);

        writer.write_frame(&Frame::Init(self.init_message())).await?;
        let ready = handshake::await_ready(&mut reader, &mut child).await?;

        let transport = Transport::new(reader, writer);
        let metadata = WorkerMetadata {
            configs: ready.configs,
            workspace_source: ready.workspace_source,
            capabilities: ready.capabilities,
            pid,
            mode: self.worker.mode,
        };
        info!(pid, configs = ?metadata.configs, "worker handshake complete");

        Ok(WorkerHandle::spawn(
            transport,
            metadata,
            child,
            self.settings.shutdown_grace,
        ))
    }
}

struct HandleInner {
    transport: Transport,
    metadata: WorkerMetadata,
    grace: Duration,
    close_requested: Arc<AtomicBool>,
    closing: AtomicBool,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<Option<WorkerExit>>,
}

/// A worker that completed its handshake.
///
/// Cloning is cheap. Dropping the last clone kills the process.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("pid", &self.inner.metadata.pid)
            .field("exit", &self.exit_status())
            .finish_non_exhaustive()
    }
}

impl WorkerHandle {
    fn spawn(
        transport: Transport,
        metadata: WorkerMetadata,
        child: Option<tokio::process::Child>,
        grace: Duration,
    ) -> Self {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let close_requested = Arc::new(AtomicBool::new(false));

        tokio::spawn(monitor::monitor_worker(
            child,
            transport.clone(),
            kill_rx,
            Arc::clone(&close_requested),
            exit_tx,
        ));

        Self {
            inner: Arc::new(HandleInner {
                transport,
                metadata,
                grace,
                close_requested,
                closing: AtomicBool::new(false),
                kill_tx: Mutex::new(Some(kill_tx)),
                exit_rx,
            }),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn metadata(&self) -> &WorkerMetadata {
        &self.inner.metadata
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.metadata.pid
    }

    /// How the worker went away, or `None` while it is alive.
    pub fn exit_status(&self) -> Option<WorkerExit> {
        *self.inner.exit_rx.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.exit_status().is_none()
    }

    /// Resolves once the worker is gone.
    pub async fn wait_exit(&self) -> WorkerExit {
        let mut rx = self.inner.exit_rx.clone();
        match rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => (*exit).unwrap_or(WorkerExit::Crashed { code: None }),
            // The monitor only drops its sender after publishing.
            Err(_) => self
                .exit_status()
                .unwrap_or(WorkerExit::Crashed { code: None }),
        }
    }

    /// Ask the worker to close, then kill it if it overstays the grace period.
    ///
    /// Always resolves. A second call returns immediately.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            debug!("worker close already requested");
            return;
        }
        self.inner.close_requested.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.inner.grace;

        if self.is_alive() {
            let call = self.inner.transport.call(Method::Close.as_str(), Vec::new());
            match timeout_at(deadline, call).await {
                Ok(Ok(_)) => debug!("worker acknowledged close"),
                Ok(Err(err)) => debug!(error = %err, "close call did not complete"),
                Err(_) => warn!("worker did not answer close in time"),
            }

            if timeout_at(deadline, self.wait_exit()).await.is_err() {
                warn!(grace = ?self.inner.grace, "worker still alive after grace period");
                if let Some(kill) = lock(&self.inner.kill_tx).take() {
                    let _ = kill.send(());
                }
                let _ = tokio::time::timeout(self.inner.grace, self.wait_exit()).await;
            }
        }

        self.inner.transport.close();
    }
}
