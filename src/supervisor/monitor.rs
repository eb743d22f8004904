// src/supervisor/monitor.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use crate::transport::Transport;
use crate::types::WorkerExit;

/// Owns the worker process after the handshake.
///
/// Either the process exits on its own, or a kill is requested by
/// `WorkerHandle::close` once the grace period ran out. Without a process
/// (attach mode) the connection closing counts as the exit.
pub(crate) async fn monitor_worker(
    child: Option<Child>,
    transport: Transport,
    mut kill_rx: oneshot::Receiver<()>,
    close_requested: Arc<AtomicBool>,
    exit_tx: watch::Sender<Option<WorkerExit>>,
) {
    let code = match child {
        Some(mut child) => {
            let pid = child.id();
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => status.code(),
                    Err(err) => {
                        warn!(pid, error = %err, "waiting for worker failed");
                        None
                    }
                },
                _ = &mut kill_rx => {
                    warn!(pid, "killing worker");
                    if let Err(err) = child.kill().await {
                        warn!(pid, error = %err, "failed to kill worker");
                    }
                    child.wait().await.ok().and_then(|s| s.code())
                }
            }
        }
        None => {
            tokio::select! {
                _ = transport.closed() => {}
                _ = &mut kill_rx => {}
            }
            None
        }
    };

    transport.close();

    let exit = WorkerExit::classify(code, close_requested.load(Ordering::SeqCst));
    match exit {
        WorkerExit::Requested => info!(?code, "worker closed"),
        WorkerExit::SelfRestart => info!("worker exited cleanly on its own; restart needed"),
        WorkerExit::Crashed { code } => warn!(?code, "worker crashed"),
    }
    exit_tx.send_replace(Some(exit));
}
