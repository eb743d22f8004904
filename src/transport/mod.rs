// src/transport/mod.rs

//! Message transport between controller and worker.
//!
//! - [`frame`] is the newline-delimited JSON codec and the frame enum.
//! - [`channel`] owns the [`Transport`]: call multiplexing, event fan-out and
//!   close semantics.
//! - [`observers`] provides the token-based observer lists used for transport
//!   events and re-used for workspace notifications.
//!
//! The transport does not care what carries the bytes: child stdio, a TCP
//! socket, or an in-memory duplex all work the same.

pub mod channel;
pub mod frame;
pub mod observers;

pub use channel::{HandlerFuture, RequestHandler, Transport};
pub use frame::{Frame, FrameReader, FrameWriter, RemoteError};
pub use observers::{EventRegistry, ObserverList, SubscriptionId};
