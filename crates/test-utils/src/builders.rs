#![allow(dead_code)]

use std::collections::BTreeMap;

use testrelay::config::{ConfigFile, RawConfigFile};
use testrelay::protocol::{
    ErrorPayload, RemoteFile, RemoteTask, RemoteTaskKind, StackFrame, TaskMode, TaskResult,
    TaskState,
};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(command: &str) -> Self {
        let mut config = RawConfigFile::default();
        config.worker.command = Some(command.to_string());
        Self { config }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.config.worker.args.push(arg.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.config
            .worker
            .env
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn shutdown_grace(mut self, grace: &str) -> Self {
        self.config.supervisor.shutdown_grace = grace.to_string();
        self
    }

    pub fn watch_include(mut self, pattern: &str) -> Self {
        self.config.watch.include.push(pattern.to_string());
        self
    }

    pub fn watch_exclude(mut self, pattern: &str) -> Self {
        self.config.watch.exclude.push(pattern.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for a reported test file.
pub struct RemoteFileBuilder {
    file: RemoteFile,
}

impl RemoteFileBuilder {
    /// `path` is absolute; the display name is its last component.
    pub fn new(id: &str, path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            file: RemoteFile {
                id: id.to_string(),
                name,
                filepath: path.to_string(),
                project_name: String::new(),
                tasks: Vec::new(),
                result: None,
            },
        }
    }

    pub fn project(mut self, project: &str) -> Self {
        self.file.project_name = project.to_string();
        self
    }

    pub fn task(mut self, task: RemoteTask) -> Self {
        self.file.tasks.push(task);
        self
    }

    pub fn result(mut self, result: TaskResult) -> Self {
        self.file.result = Some(result);
        self
    }

    pub fn build(self) -> RemoteFile {
        self.file
    }
}

/// Builder for a suite or test inside a file.
pub struct RemoteTaskBuilder {
    task: RemoteTask,
}

impl RemoteTaskBuilder {
    fn new(id: &str, name: &str, kind: RemoteTaskKind) -> Self {
        Self {
            task: RemoteTask {
                id: id.to_string(),
                name: name.to_string(),
                kind,
                mode: TaskMode::Run,
                each: false,
                dynamic: false,
                location: None,
                tags: Vec::new(),
                tasks: Vec::new(),
                result: None,
            },
        }
    }

    pub fn suite(id: &str, name: &str) -> Self {
        Self::new(id, name, RemoteTaskKind::Suite)
    }

    pub fn test(id: &str, name: &str) -> Self {
        Self::new(id, name, RemoteTaskKind::Test)
    }

    /// Concrete row of a table-driven declaration.
    pub fn each(mut self) -> Self {
        self.task.each = true;
        self
    }

    /// Table-driven declaration with placeholders in its name.
    pub fn dynamic(mut self) -> Self {
        self.task.dynamic = true;
        self
    }

    pub fn child(mut self, task: RemoteTask) -> Self {
        self.task.tasks.push(task);
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.task.tags.push(tag.to_string());
        self
    }

    pub fn result(mut self, result: TaskResult) -> Self {
        self.task.result = Some(result);
        self
    }

    pub fn build(self) -> RemoteTask {
        self.task
    }
}

pub fn passed(duration: f64) -> TaskResult {
    TaskResult {
        state: TaskState::Pass,
        duration: Some(duration),
        errors: Vec::new(),
    }
}

pub fn failed(message: &str) -> TaskResult {
    TaskResult {
        state: TaskState::Fail,
        duration: Some(1.0),
        errors: vec![ErrorPayload {
            message: message.to_string(),
            ..ErrorPayload::default()
        }],
    }
}

pub fn state(state: TaskState) -> TaskResult {
    TaskResult {
        state,
        duration: None,
        errors: Vec::new(),
    }
}

pub fn error_at(message: &str, file: &str, line: u32, column: u32) -> ErrorPayload {
    ErrorPayload {
        message: message.to_string(),
        stacks: vec![StackFrame {
            file: file.to_string(),
            line,
            column,
            method: String::new(),
        }],
        ..ErrorPayload::default()
    }
}

pub fn env_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
