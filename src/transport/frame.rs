// src/transport/frame.rs

//! Newline-delimited JSON framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tracing::warn;

use crate::errors::Result;
use crate::protocol::{InitMessage, ReadyMessage};

/// Error carried in a `response` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Everything that can travel over the wire, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    Ready(ReadyMessage),
    Error {
        error: String,
    },
    Debug {
        #[serde(default)]
        args: Vec<String>,
    },
    Init(InitMessage),
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Response {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
    Event {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

/// Reads frames off any byte stream.
pub struct FrameReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }

    /// Next frame, or `None` at end of stream.
    ///
    /// Lines that are not valid frames are skipped with a warning: a worker
    /// that prints to the protocol stream must not take the channel down.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Frame>(line) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => {
                    warn!(error = %err, line = %truncate(line, 200), "skipping malformed frame");
                }
            }
        }
    }
}

/// Writes frames to any byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut bytes = serde_json::to_vec(frame)?;
        bytes.push(b'\n');
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
