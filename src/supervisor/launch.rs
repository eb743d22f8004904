// src/supervisor/launch.rs

//! Bringing a worker up in one of the three [`LaunchMode`]s.

use std::net::SocketAddr;
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::errors::{RelayError, Result};
use crate::types::LaunchMode;

/// Env var carrying the controller's address in terminal mode.
pub const ADDRESS_ENV: &str = "TESTRELAY_ADDRESS";

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// A freshly launched worker: the byte streams to talk over and, unless we
/// attached to someone else's process, the child handle.
pub struct Launched {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub child: Option<Child>,
}

impl Launched {
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }
}

pub async fn launch(config: &WorkerConfig) -> Result<Launched> {
    match config.mode {
        LaunchMode::Child => launch_child(config),
        LaunchMode::Terminal => launch_terminal(config).await,
        LaunchMode::Attach => launch_attach(config).await,
    }
}

fn launch_child(config: &WorkerConfig) -> Result<Launched> {
    let program = config
        .command
        .as_deref()
        .ok_or_else(|| RelayError::ConfigError("worker command missing".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(&config.args)
        .current_dir(&config.cwd)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning worker '{program}'"))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| RelayError::Startup("worker stdin not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RelayError::Startup("worker stdout not captured".to_string()))?;

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let pid = child.id();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(pid, "worker stderr: {}", line);
            }
        });
    }

    info!(pid = child.id(), command = %program, "worker process spawned");

    Ok(Launched {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        child: Some(child),
    })
}

async fn launch_terminal(config: &WorkerConfig) -> Result<Launched> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let address = listener.local_addr()?;
    let line = config.shell_line();

    // Run through the platform shell with inherited stdio so the output stays
    // visible to the user.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&line);
        c
    };
    cmd.current_dir(&config.cwd)
        .envs(&config.env)
        .env(ADDRESS_ENV, address.to_string())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning worker in terminal: '{line}'"))?;
    info!(pid = child.id(), %address, "terminal worker spawned; waiting for connection");

    let stream = tokio::select! {
        accepted = listener.accept() => accepted?.0,
        status = child.wait() => {
            let code = status?.code().unwrap_or(-1);
            return Err(RelayError::ProcessExited(code));
        }
    };

    let (reader, writer) = split_stream(stream);
    Ok(Launched {
        reader,
        writer,
        child: Some(child),
    })
}

async fn launch_attach(config: &WorkerConfig) -> Result<Launched> {
    let address: SocketAddr = config.attach_address.ok_or_else(|| {
        RelayError::ConfigError("attach mode needs [worker].attach_address".to_string())
    })?;

    let listener = TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "waiting for worker to attach");
    let (stream, peer) = listener.accept().await?;
    debug!(%peer, "worker attached");

    let (reader, writer) = split_stream(stream);
    Ok(Launched {
        reader,
        writer,
        child: None,
    })
}

fn split_stream(stream: TcpStream) -> (BoxedReader, BoxedWriter) {
    let (read, write) = stream.into_split();
    (Box::new(read), Box::new(write))
}
