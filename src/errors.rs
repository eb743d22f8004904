// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Only infrastructure failures (transport, process, config) are errors.
//! Test failures are data and flow through [`crate::protocol::TaskResult`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// The transport was closed (explicitly or because the peer went away)
    /// while a call was pending, or a call was issued after close.
    #[error("channel closed")]
    ChannelClosed,

    /// The worker answered a call with an error.
    #[error("worker rejected `{method}`: {message}")]
    Remote { method: String, message: String },

    /// The worker sent an `error` handshake message instead of `ready`.
    #[error("worker failed to start: {0}")]
    Startup(String),

    /// The worker process went away before the handshake completed.
    #[error("process exited with code {0}")]
    ProcessExited(i32),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Whether this error means the channel to the worker is gone.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, RelayError::ChannelClosed)
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RelayError>;
