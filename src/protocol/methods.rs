// src/protocol/methods.rs

//! Controller → worker RPC surface.

use std::fmt;

use serde_json::Value;

use crate::errors::Result;
use crate::protocol::task::Specification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetFiles,
    CollectTests,
    RunTests,
    UpdateSnapshots,
    WatchTests,
    UnwatchTests,
    CancelRun,
    EnableCoverage,
    DisableCoverage,
    WaitForCoverageReport,
    OnFilesCreated,
    OnFilesChanged,
    Close,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::GetFiles => "getFiles",
            Method::CollectTests => "collectTests",
            Method::RunTests => "runTests",
            Method::UpdateSnapshots => "updateSnapshots",
            Method::WatchTests => "watchTests",
            Method::UnwatchTests => "unwatchTests",
            Method::CancelRun => "cancelRun",
            Method::EnableCoverage => "enableCoverage",
            Method::DisableCoverage => "disableCoverage",
            Method::WaitForCoverageReport => "waitForCoverageReport",
            Method::OnFilesCreated => "onFilesCreated",
            Method::OnFilesChanged => "onFilesChanged",
            Method::Close => "close",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positional arguments shared by `runTests`, `updateSnapshots` and
/// `watchTests`: `(specs | null, namePattern | null)`.
pub fn selection_args(
    specs: Option<&[Specification]>,
    name_pattern: Option<&str>,
) -> Result<Vec<Value>> {
    let specs = match specs {
        Some(specs) => serde_json::to_value(specs)?,
        None => Value::Null,
    };
    let pattern = match name_pattern {
        Some(p) => Value::String(p.to_string()),
        None => Value::Null,
    };
    Ok(vec![specs, pattern])
}

pub fn paths_args(paths: &[String]) -> Result<Vec<Value>> {
    Ok(vec![serde_json::to_value(paths)?])
}
