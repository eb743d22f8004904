// src/tree/location.rs

//! Mapping error stacks back to a position in the test file.

use std::sync::LazyLock;

use regex::Regex;

use crate::protocol::{ErrorPayload, Location, StackFrame};

/// `    at name (/path/file.ts:12:5)` or `    at /path/file.ts:12:5`.
static STACK_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*at (?:(.*?) \()?(.+?):(\d+):(\d+)\)?\s*$").ok()
});

/// Normalize a path for comparison: drop a `file://` scheme, use forward
/// slashes, resolve `.` / `..` and lowercase a Windows drive letter.
pub fn normalize_path(path: &str) -> String {
    let mut path = path.strip_prefix("file://").unwrap_or(path).replace('\\', "/");

    // `file:///C:/x` leaves `/C:/x` behind.
    let bytes = path.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':' {
        path.remove(0);
    }

    let mut prefix = String::new();
    let mut rest = path.as_str();
    let bytes = rest.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        prefix.push((bytes[0] as char).to_ascii_lowercase());
        prefix.push(':');
        rest = &rest[2..];
    }

    let absolute = rest.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let mut out = prefix;
    if absolute {
        out.push('/');
    }
    out.push_str(&parts.join("/"));
    out
}

/// Parse a textual V8-style stack into frames; unrecognized lines are skipped.
pub fn parse_stack(stack: &str) -> Vec<StackFrame> {
    let Some(re) = STACK_LINE.as_ref() else {
        return Vec::new();
    };
    stack
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(StackFrame {
                method: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
                file: caps.get(2)?.as_str().to_string(),
                line: caps.get(3)?.as_str().parse().ok()?,
                column: caps.get(4)?.as_str().parse().ok()?,
            })
        })
        .collect()
}

/// Location of the first frame pointing into `file_path`.
///
/// Structured frames win over the textual stack when both are present.
pub fn find_location(error: &ErrorPayload, file_path: &str) -> Option<Location> {
    let target = normalize_path(file_path);
    let parsed;
    let frames: &[StackFrame] = if !error.stacks.is_empty() {
        &error.stacks
    } else {
        parsed = error.stack.as_deref().map(parse_stack).unwrap_or_default();
        &parsed
    };

    frames
        .iter()
        .find(|frame| normalize_path(&frame.file) == target)
        .map(|frame| Location {
            line: frame.line,
            column: frame.column,
        })
}
