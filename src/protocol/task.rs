// src/protocol/task.rs

//! Remote task model as reported by the worker.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque worker-assigned task id, stable within one collection pass.
pub type TaskId = String;

/// `(project, absolute file path)`: the minimal key for one worker-side test
/// file. Travels on the wire as a two-element array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Specification {
    pub project: String,
    pub file: String,
}

impl Specification {
    pub fn new(project: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            file: file.into(),
        }
    }
}

impl From<(String, String)> for Specification {
    fn from((project, file): (String, String)) -> Self {
        Self { project, file }
    }
}

impl From<Specification> for (String, String) {
    fn from(spec: Specification) -> Self {
        (spec.project, spec.file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pass,
    Fail,
    Skip,
    Todo,
    Run,
    Only,
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    #[default]
    Run,
    Skip,
    Only,
    Todo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteTaskKind {
    Suite,
    Test,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub method: String,
}

/// A thrown value as serialized by the worker.
///
/// Known fields are typed; anything else the worker attached is kept in
/// `extra` so nothing is lost on the way to observers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacks: Vec<StackFrame>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorPayload>,
}

impl TaskResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A suite or test inside a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTask {
    pub id: TaskId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RemoteTaskKind,
    #[serde(default)]
    pub mode: TaskMode,
    /// Concrete instance produced by a table-driven declaration.
    #[serde(default)]
    pub each: bool,
    /// Template of a table-driven declaration; `name` holds placeholders.
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<RemoteTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl RemoteTask {
    pub fn is_suite(&self) -> bool {
        self.kind == RemoteTaskKind::Suite
    }
}

/// Root of one file's task tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: TaskId,
    /// Path relative to the project root, as displayed by the worker.
    pub name: String,
    pub filepath: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<RemoteTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl RemoteFile {
    pub fn specification(&self) -> Specification {
        Specification::new(self.project_name.clone(), self.filepath.clone())
    }
}

/// Something a lookup can be keyed on: a task inside a file, or the file root.
#[derive(Debug, Clone, Copy)]
pub enum TaskRef<'a> {
    Task(&'a RemoteTask),
    File(&'a RemoteFile),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLogEntry {
    pub content: String,
    #[serde(default, rename = "type")]
    pub stream: LogStream,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}
