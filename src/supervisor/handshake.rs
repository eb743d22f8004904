// src/supervisor/handshake.rs

use tokio::io::AsyncRead;
use tokio::process::Child;
use tracing::{debug, trace};

use crate::errors::{RelayError, Result};
use crate::protocol::ReadyMessage;
use crate::transport::{Frame, FrameReader};

/// Read handshake frames until the worker reports `ready`.
///
/// `debug` frames are logged and skipped. An `error` frame fails with the
/// carried message; end of stream or process exit before `ready` fails with
/// [`RelayError::ProcessExited`].
pub async fn await_ready<R>(reader: &mut FrameReader<R>, child: &mut Option<Child>) -> Result<ReadyMessage>
where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            biased;

            frame = reader.next_frame() => {
                match frame? {
                    Some(Frame::Ready(ready)) => {
                        debug!(configs = ?ready.configs, "worker ready");
                        return Ok(ready);
                    }
                    Some(Frame::Error { error }) => {
                        return Err(RelayError::Startup(error));
                    }
                    Some(Frame::Debug { args }) => {
                        debug!(args = ?args, "worker debug message during startup");
                    }
                    Some(other) => {
                        trace!(frame = ?other, "ignoring frame before ready");
                    }
                    None => {
                        let code = exit_code(child).await;
                        return Err(RelayError::ProcessExited(code));
                    }
                }
            }

            code = wait_child(child) => {
                return Err(RelayError::ProcessExited(code));
            }
        }
    }
}

/// Resolves when the child exits; never resolves without a child.
async fn wait_child(child: &mut Option<Child>) -> i32 {
    match child {
        Some(child) => match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(_) => -1,
        },
        None => std::future::pending().await,
    }
}

async fn exit_code(child: &mut Option<Child>) -> i32 {
    match child {
        Some(child) => match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(_) => -1,
        },
        None => -1,
    }
}
