// src/workspace/coverage.rs

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::Result;

/// Turns the directory named by `waitForCoverageReport` into a report.
pub trait CoverageReader: Send + Sync + 'static {
    fn read(&self, dir: &Path) -> Result<Value>;
}

/// Reads a JSON coverage summary (`coverage-summary.json` by default).
#[derive(Debug, Clone)]
pub struct JsonSummaryReader {
    file_name: PathBuf,
}

impl Default for JsonSummaryReader {
    fn default() -> Self {
        Self::new("coverage-summary.json")
    }
}

impl JsonSummaryReader {
    pub fn new(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

impl CoverageReader for JsonSummaryReader {
    fn read(&self, dir: &Path) -> Result<Value> {
        let contents = fs::read_to_string(dir.join(&self.file_name))?;
        Ok(serde_json::from_str(&contents)?)
    }
}
