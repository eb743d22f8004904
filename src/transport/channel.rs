// src/transport/channel.rs

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::errors::{RelayError, Result};
use crate::util::lock;

use super::frame::{Frame, FrameReader, FrameWriter, RemoteError};
use super::observers::{EventRegistry, SubscriptionId};

/// Future returned by a [`RequestHandler`]; `Err` becomes a remote error.
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = std::result::Result<Value, String>> + Send + 'static>>;

/// Answers calls coming from the peer.
///
/// The controller side rarely installs one; the worker side (and the fake
/// worker used in tests) always does.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, method: String, args: Vec<Value>) -> HandlerFuture;
}

enum WriterCommand {
    Frame(Frame),
    Shutdown,
}

struct PendingCall {
    method: String,
    reply: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PendingCalls {
    closed: bool,
    calls: HashMap<u64, PendingCall>,
}

struct Shared {
    pending: Mutex<PendingCalls>,
    next_id: AtomicU64,
    events: EventRegistry,
    handler: Mutex<Option<Arc<dyn RequestHandler>>>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    closed_tx: watch::Sender<bool>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

/// Symmetric message channel: calls with correlated responses in both
/// directions plus fire-and-forget events.
///
/// Cloning is cheap; all clones share the same underlying stream.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_calls())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Wrap an already-framed stream pair and start the reader/writer tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<R, W>(reader: FrameReader<R>, writer: FrameWriter<W>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingCalls::default()),
            next_id: AtomicU64::new(1),
            events: EventRegistry::default(),
            handler: Mutex::new(None),
            writer_tx,
            closed_tx,
            reader_task: Mutex::new(None),
        });

        tokio::spawn(writer_loop(writer, writer_rx, Arc::downgrade(&shared)));
        let reader_task = tokio::spawn(reader_loop(reader, Arc::downgrade(&shared)));
        *lock(&shared.reader_task) = Some(reader_task);

        Self { shared }
    }

    /// Build a transport straight from raw read/write halves.
    pub fn from_io<R, W>(read: R, write: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(FrameReader::new(read), FrameWriter::new(write))
    }

    /// Two transports connected back to back in memory.
    pub fn pair() -> (Transport, Transport) {
        let (a, b) = tokio::io::duplex(256 * 1024);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (
            Transport::from_io(a_read, a_write),
            Transport::from_io(b_read, b_write),
        )
    }

    /// Issue a call.
    ///
    /// The request frame is queued before this returns, so calls issued one
    /// after another reach the peer in that order even if their futures are
    /// polled later. There is no timeout: a test run may legitimately take
    /// arbitrarily long. If the channel closes first, the future resolves to
    /// [`RelayError::ChannelClosed`].
    pub fn call(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value>> + Send + 'static + use<> {
        let queued = self.shared.enqueue_call(method, args);
        async move {
            match queued {
                Ok(rx) => rx.await.unwrap_or(Err(RelayError::ChannelClosed)),
                Err(err) => Err(err),
            }
        }
    }

    /// Typed variant of [`Transport::call`].
    pub fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<T>> + Send + 'static {
        let call = self.call(method, args);
        async move {
            let value = call.await?;
            Ok(serde_json::from_value(value)?)
        }
    }

    /// Send an event to the peer.
    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::ChannelClosed);
        }
        self.shared
            .writer_tx
            .send(WriterCommand::Frame(Frame::Event {
                name: event.to_string(),
                args,
            }))
            .map_err(|_| RelayError::ChannelClosed)
    }

    /// Subscribe to an event from the peer. Handlers run on the reader task, in
    /// arrival order, and must not block.
    pub fn on<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.shared.events.on(event, handler)
    }

    /// Remove a subscription. Removing twice returns `false` the second time.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.events.off(id)
    }

    /// Install the handler answering the peer's calls.
    pub fn serve<H: RequestHandler>(&self, handler: H) {
        *lock(&self.shared.handler) = Some(Arc::new(handler));
    }

    /// Close the channel. Every pending call rejects with `ChannelClosed`.
    pub fn close(&self) {
        self.shared.shutdown();
        if let Some(task) = lock(&self.shared.reader_task).take() {
            task.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.pending).closed
    }

    /// Resolves once the channel is closed, by either side.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn pending_calls(&self) -> usize {
        lock(&self.shared.pending).calls.len()
    }
}

impl Shared {
    fn enqueue_call(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        let (reply, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(RelayError::ChannelClosed);
            }
            pending.calls.insert(
                id,
                PendingCall {
                    method: method.to_string(),
                    reply,
                },
            );
        }

        trace!(id, method, "sending request");
        let frame = Frame::Request {
            id,
            method: method.to_string(),
            args,
        };
        if self.writer_tx.send(WriterCommand::Frame(frame)).is_err() {
            lock(&self.pending).calls.remove(&id);
            return Err(RelayError::ChannelClosed);
        }

        Ok(rx)
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Response { id, result, error } => self.resolve(id, result, error),
            Frame::Event { name, args } => {
                let delivered = self.events.emit(&name, &args);
                if delivered == 0 {
                    trace!(event = %name, "event without subscribers");
                }
            }
            Frame::Request { id, method, args } => self.answer(id, method, args),
            Frame::Debug { args } => debug!(args = ?args, "worker debug message"),
            other => debug!(frame = ?other, "ignoring handshake frame after startup"),
        }
    }

    fn resolve(&self, id: u64, result: Value, error: Option<RemoteError>) {
        let Some(call) = lock(&self.pending).calls.remove(&id) else {
            debug!(id, "response for unknown or abandoned call");
            return;
        };
        let outcome = match error {
            Some(err) => Err(RelayError::Remote {
                method: call.method,
                message: err.message,
            }),
            None => Ok(result),
        };
        let _ = call.reply.send(outcome);
    }

    fn answer(&self, id: u64, method: String, args: Vec<Value>) {
        let handler = lock(&self.handler).clone();
        let writer_tx = self.writer_tx.clone();

        let Some(handler) = handler else {
            warn!(method = %method, "no request handler installed; rejecting call");
            let _ = writer_tx.send(WriterCommand::Frame(Frame::Response {
                id,
                result: Value::Null,
                error: Some(RemoteError {
                    message: format!("no handler for `{method}`"),
                    name: None,
                }),
            }));
            return;
        };

        // Start the handler here so it sees requests in arrival order.
        let reply = handler.handle(method, args);
        tokio::spawn(async move {
            let frame = match reply.await {
                Ok(result) => Frame::Response {
                    id,
                    result,
                    error: None,
                },
                Err(message) => Frame::Response {
                    id,
                    result: Value::Null,
                    error: Some(RemoteError {
                        message,
                        name: None,
                    }),
                },
            };
            let _ = writer_tx.send(WriterCommand::Frame(frame));
        });
    }

    fn shutdown(&self) {
        let drained = {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return;
            }
            pending.closed = true;
            std::mem::take(&mut pending.calls)
        };

        debug!(pending = drained.len(), "transport closing; rejecting pending calls");
        for (_, call) in drained {
            let _ = call.reply.send(Err(RelayError::ChannelClosed));
        }

        let _ = self.writer_tx.send(WriterCommand::Shutdown);
        self.closed_tx.send_replace(true);
    }
}

async fn reader_loop<R>(mut reader: FrameReader<R>, shared: Weak<Shared>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = reader.next_frame().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match next {
            Ok(Some(frame)) => shared.dispatch(frame),
            Ok(None) => {
                debug!("transport reached end of stream");
                shared.shutdown();
                break;
            }
            Err(err) => {
                warn!(error = %err, "transport read failed");
                shared.shutdown();
                break;
            }
        }
    }
}

async fn writer_loop<W>(
    mut writer: FrameWriter<W>,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    shared: Weak<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Frame(frame) => {
                if let Err(err) = writer.write_frame(&frame).await {
                    warn!(error = %err, "transport write failed");
                    if let Some(shared) = shared.upgrade() {
                        shared.shutdown();
                    }
                    break;
                }
            }
            WriterCommand::Shutdown => {
                let _ = writer.shutdown().await;
                break;
            }
        }
    }
}
