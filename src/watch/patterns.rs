// src/watch/patterns.rs

use std::fmt;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::WatchSection;
use crate::errors::{RelayError, Result};

/// Compiled `[watch]` include/exclude globs, matched against paths relative
/// to the workspace root with forward slashes.
///
/// An empty include list matches everything not excluded.
#[derive(Clone)]
pub struct FileMatcher {
    include: Option<GlobSet>,
    exclude: GlobSet,
    include_src: Vec<String>,
    exclude_src: Vec<String>,
}

impl fmt::Debug for FileMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileMatcher")
            .field("include", &self.include_src)
            .field("exclude", &self.exclude_src)
            .finish()
    }
}

impl FileMatcher {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include_set = if include.is_empty() {
            None
        } else {
            Some(build_globset(include)?)
        };
        Ok(Self {
            include: include_set,
            exclude: build_globset(exclude)?,
            include_src: include.to_vec(),
            exclude_src: exclude.to_vec(),
        })
    }

    pub fn from_config(watch: &WatchSection) -> Result<Self> {
        Self::new(&watch.include, &watch.exclude)
    }

    pub fn matches(&self, relative: &str) -> bool {
        if self.exclude.is_match(relative) {
            return false;
        }
        match &self.include {
            Some(set) => set.is_match(relative),
            None => true,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| RelayError::ConfigError(format!("invalid glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RelayError::ConfigError(format!("building glob set: {e}")))
}
