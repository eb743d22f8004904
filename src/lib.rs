// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod logging;
pub mod protocol;
pub mod scheduler;
pub mod supervisor;
pub mod transport;
pub mod tree;
pub mod types;
mod util;
pub mod watch;
pub mod workspace;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, ConfigResolver};
use crate::protocol::LogStream;
use crate::scheduler::{RunOutcome, RunRequest};
use crate::supervisor::{ProcessSupervisor, WorkerHandle};
use crate::tree::{NodeId, NodeKind, NodeStatus, TreeReconciler};
use crate::types::WorkerExit;
use crate::watch::{forward_changes, spawn_watcher, FileMatcher};
use crate::workspace::{JsonSummaryReader, WorkspaceEvent, WorkspaceHandle, WorkspaceOptions};

/// How one worker lifetime ended.
enum Lifetime {
    Done(i32),
    /// The worker exited cleanly on its own; resolve config again and start
    /// a fresh one.
    Restart,
}

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config resolution
/// - the worker supervisor
/// - the workspace actor (scheduler + tree)
/// - (optional) the file watcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let resolver = ConfigResolver::new(PathBuf::from(&args.config));

    loop {
        let cfg = resolver
            .resolve()
            .with_context(|| format!("loading config {}", resolver.path().display()))?;

        match run_worker(&args, &cfg).await? {
            Lifetime::Done(code) => return Ok(code),
            Lifetime::Restart => {
                info!("worker restarted itself; resolving configuration again");
                resolver.invalidate();
            }
        }
    }
}

async fn run_worker(args: &CliArgs, cfg: &ConfigFile) -> Result<Lifetime> {
    let supervisor = ProcessSupervisor::from_config(cfg);
    let worker = supervisor.start().await.context("starting worker")?;

    let workspace = WorkspaceHandle::spawn_with(
        worker.transport().clone(),
        WorkspaceOptions {
            root: cfg.worker.cwd.to_string_lossy().into_owned(),
            coverage: Some(Arc::new(JsonSummaryReader::default())),
        },
    );
    workspace.watch_worker(&worker);
    workspace.subscribe(print_event);

    let files = workspace.refresh_files().await.context("listing test files")?;
    info!(files, "test files discovered");

    let included = match &args.filter {
        Some(filter) => {
            let filter = filter.clone();
            Some(workspace.inspect(move |r| files_matching(r, &filter)).await?)
        }
        None => None,
    };

    if args.list {
        let listing = workspace.inspect(render_tree).await?;
        print!("{listing}");
        teardown(&worker, &workspace).await;
        return Ok(Lifetime::Done(0));
    }

    let request = RunRequest {
        included,
        continuous: args.watch,
        update_snapshots: args.update_snapshots,
        coverage: args.coverage,
    };

    let lifetime = if args.watch {
        watch_until_interrupted(cfg, &worker, &workspace, request).await?
    } else {
        run_once(&worker, &workspace, request).await?
    };

    teardown(&worker, &workspace).await;
    Ok(lifetime)
}

async fn run_once(
    worker: &WorkerHandle,
    workspace: &WorkspaceHandle,
    request: RunRequest,
) -> Result<Lifetime> {
    let outcome = workspace.run_tests(request).wait().await;

    if worker.exit_status() == Some(WorkerExit::SelfRestart) {
        return Ok(Lifetime::Restart);
    }

    let summary = workspace.inspect(RunSummary::from_tree).await?;
    summary.print();

    match outcome {
        Ok(RunOutcome::Completed) if summary.failed == 0 => Ok(Lifetime::Done(0)),
        Ok(_) => Ok(Lifetime::Done(1)),
        Err(err) => {
            warn!(error = %err, "run did not complete");
            Ok(Lifetime::Done(1))
        }
    }
}

async fn watch_until_interrupted(
    cfg: &ConfigFile,
    worker: &WorkerHandle,
    workspace: &WorkspaceHandle,
    request: RunRequest,
) -> Result<Lifetime> {
    let matcher = FileMatcher::from_config(&cfg.watch)?;
    let (changes_tx, changes_rx) = mpsc::unbounded_channel();
    let _watcher = spawn_watcher(&cfg.worker.cwd, matcher, changes_tx)?;
    tokio::spawn(forward_changes(changes_rx, workspace.clone()));

    let ticket = workspace.run_tests(request);
    info!("watching for changes; press Ctrl-C to stop");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                warn!(error = %err, "failed to listen for Ctrl-C");
            }
            let _ = ticket.cancel();
            Ok(Lifetime::Done(0))
        }
        exit = worker.wait_exit() => match exit {
            WorkerExit::SelfRestart => Ok(Lifetime::Restart),
            WorkerExit::Requested => Ok(Lifetime::Done(0)),
            WorkerExit::Crashed { code } => {
                eprintln!("worker crashed (exit code {code:?})");
                Ok(Lifetime::Done(1))
            }
        },
    }
}

async fn teardown(worker: &WorkerHandle, workspace: &WorkspaceHandle) {
    worker.close().await;
    workspace.shutdown().await;
}

fn print_event(event: &WorkspaceEvent) {
    match event {
        WorkspaceEvent::ConsoleOutput { entry, .. } => match entry.stream {
            LogStream::Stdout => print!("{}", entry.content),
            LogStream::Stderr => eprint!("{}", entry.content),
        },
        WorkspaceEvent::UnhandledError(message) => eprintln!("unhandled error: {message}"),
        WorkspaceEvent::CoverageError { message, .. } => {
            warn!(error = %message, "coverage report unavailable");
        }
        WorkspaceEvent::CoverageReport { report, .. } => {
            if let Some(total) = report.get("total") {
                println!("coverage: {total}");
            }
        }
        WorkspaceEvent::WorkerExited(exit) if exit.is_fatal() => {
            eprintln!("worker exited unexpectedly: {exit:?}");
        }
        _ => {}
    }
}

fn files_matching(reconciler: &TreeReconciler, filter: &str) -> Vec<NodeId> {
    reconciler
        .tree()
        .iter()
        .filter(|n| n.kind == NodeKind::File)
        .filter(|n| n.spec.as_ref().is_some_and(|s| s.file.contains(filter)))
        .map(|n| n.id)
        .collect()
}

fn render_tree(reconciler: &TreeReconciler) -> String {
    let tree = reconciler.tree();
    let mut out = String::new();
    let mut stack: Vec<(NodeId, usize)> = tree.roots().map(|id| (id, 0)).collect();
    stack.reverse();

    while let Some((id, depth)) = stack.pop() {
        let Some(node) = tree.get(id) else {
            continue;
        };
        let suffix = if node.kind == NodeKind::Folder { "/" } else { "" };
        out.push_str(&format!("{}{}{}\n", "  ".repeat(depth), node.label, suffix));
        for child in tree.children(Some(id)).into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    out
}

/// Counts of case outcomes after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<String>,
}

impl RunSummary {
    pub fn from_tree(reconciler: &TreeReconciler) -> Self {
        let mut summary = RunSummary::default();
        for node in reconciler.tree().iter() {
            if node.kind != NodeKind::Case || node.is_template() {
                continue;
            }
            match &node.status {
                NodeStatus::Passed { .. } => summary.passed += 1,
                NodeStatus::Failed { messages, .. } => {
                    summary.failed += 1;
                    let first = messages.first().map(|m| m.message.as_str()).unwrap_or("");
                    summary.failures.push(format!("{}: {}", node.label, first));
                }
                NodeStatus::Skipped => summary.skipped += 1,
                _ => {}
            }
        }
        summary.failures.sort();
        summary
    }

    pub fn print(&self) {
        for failure in &self.failures {
            println!("FAIL {failure}");
        }
        println!(
            "{} passed, {} failed, {} skipped",
            self.passed, self.failed, self.skipped
        );
    }
}
