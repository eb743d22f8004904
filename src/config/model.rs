// src/config/model.rs

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::LaunchMode;

/// Grace period between the `close` RPC and a forced kill.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration as read from TOML, before validation.
///
/// ```toml
/// [worker]
/// command = "node"
/// args = ["./worker.mjs"]
/// mode = "child"
/// config_file = "vitest.config.ts"
/// env = { NODE_ENV = "test" }
///
/// [supervisor]
/// shutdown_grace = "5s"
///
/// [watch]
/// include = ["**/*.test.ts"]
/// exclude = ["**/node_modules/**"]
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub supervisor: SupervisorSection,

    #[serde(default)]
    pub watch: WatchSection,
}

/// `[worker]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WorkerSection {
    /// Executable that starts the worker. Not needed in `attach` mode.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// `"child"` (default), `"terminal"` or `"attach"`.
    #[serde(default)]
    pub mode: LaunchMode,

    /// Working directory for the worker, relative to the config file.
    #[serde(default)]
    pub cwd: Option<String>,

    /// Test-framework config file handed to the worker in `init`.
    #[serde(default)]
    pub config_file: Option<String>,

    #[serde(default)]
    pub workspace_file: Option<String>,

    /// Extra CLI-style arguments forwarded verbatim in `init`.
    #[serde(default)]
    pub arguments: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub debug: bool,

    /// Ask the worker to collect tests statically, which reports table-driven
    /// templates as dynamic nodes.
    #[serde(default)]
    pub ast_collect: bool,

    /// Address to listen on in `attach` mode (e.g. `"127.0.0.1:9339"`).
    #[serde(default)]
    pub attach_address: Option<String>,
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    /// Duration string such as `"5s"` or `"500ms"`.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: String,
}

fn default_shutdown_grace() -> String {
    "5s".to_string()
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// `[watch]` section, consumed by the file watcher.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WatchSection {
    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub worker: WorkerConfig,
    pub supervisor: SupervisorConfig,
    pub watch: WatchSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        worker: WorkerConfig,
        supervisor: SupervisorConfig,
        watch: WatchSection,
    ) -> Self {
        Self {
            worker,
            supervisor,
            watch,
        }
    }
}

/// Everything needed to launch one worker and send it `init`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub mode: LaunchMode,
    pub cwd: PathBuf,
    pub config_file: Option<String>,
    pub workspace_file: Option<String>,
    pub arguments: Option<String>,
    pub env: BTreeMap<String, String>,
    pub debug: bool,
    pub ast_collect: bool,
    pub attach_address: Option<SocketAddr>,
}

impl WorkerConfig {
    /// Child-process worker running `command args...` in `cwd`.
    pub fn child(command: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            mode: LaunchMode::Child,
            cwd: cwd.into(),
            config_file: None,
            workspace_file: None,
            arguments: None,
            env: BTreeMap::new(),
            debug: false,
            ast_collect: false,
            attach_address: None,
        }
    }

    /// The command line as a single shell string (used by terminal mode).
    pub fn shell_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        if let Some(cmd) = &self.command {
            parts.push(cmd.clone());
        }
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}
