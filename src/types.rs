use std::str::FromStr;
use serde::Deserialize;

/// How the worker process is brought up.
///
/// - `Child`: spawned as a detached child, protocol over stdin/stdout.
/// - `Terminal`: spawned in a shell with inherited stdio so the user can watch
///   it; the worker connects back over a localhost socket.
/// - `Attach`: started by someone else (typically a debugger session); we only
///   listen and wait for it to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    Child,
    Terminal,
    Attach,
}

impl Default for LaunchMode {
    fn default() -> Self {
        LaunchMode::Child
    }
}

impl FromStr for LaunchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "child" => Ok(LaunchMode::Child),
            "terminal" => Ok(LaunchMode::Terminal),
            "attach" => Ok(LaunchMode::Attach),
            other => Err(format!(
                "invalid worker mode: {other} (expected \"child\", \"terminal\" or \"attach\")"
            )),
        }
    }
}

/// Why a worker went away after it had reported ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// We asked it to close.
    Requested,
    /// Exit code 0 without a close request: the worker restarted itself, so the
    /// owner should re-resolve and start a fresh worker.
    SelfRestart,
    /// Non-zero exit, signal, or lost connection without a close request.
    Crashed { code: Option<i32> },
}

impl WorkerExit {
    /// Classify a process exit code given whether a close was requested.
    pub fn classify(code: Option<i32>, close_requested: bool) -> Self {
        if close_requested {
            return WorkerExit::Requested;
        }
        match code {
            Some(0) => WorkerExit::SelfRestart,
            other => WorkerExit::Crashed { code: other },
        }
    }

    /// Whether this exit should be shown to the user as a failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerExit::Crashed { .. })
    }
}
