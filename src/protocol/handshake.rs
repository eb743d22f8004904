// src/protocol/handshake.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Worker → controller, sent once startup and config resolution succeeded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyMessage {
    #[serde(default)]
    pub configs: Vec<String>,
    /// Path of the workspace file the worker resolved, or `false`.
    #[serde(default)]
    pub workspace_source: WorkspaceSource,
    /// Capability flags the worker advertises (e.g. `"pool": "forks"`).
    #[serde(flatten)]
    pub capabilities: BTreeMap<String, Value>,
}

/// `string | false` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkspaceSource {
    Path(String),
    Flag(bool),
}

impl Default for WorkspaceSource {
    fn default() -> Self {
        WorkspaceSource::Flag(false)
    }
}

impl WorkspaceSource {
    pub fn path(&self) -> Option<&str> {
        match self {
            WorkspaceSource::Path(p) => Some(p),
            _ => None,
        }
    }
}

/// `boolean | object` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DebugSetting {
    Enabled(bool),
    Options(Map<String, Value>),
}

impl Default for DebugSetting {
    fn default() -> Self {
        DebugSetting::Enabled(false)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMeta {
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_file: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Controller → worker, sent once right after launch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    pub meta: InitMeta,
    #[serde(default)]
    pub debug: DebugSetting,
    #[serde(default)]
    pub ast_collect: bool,
}
