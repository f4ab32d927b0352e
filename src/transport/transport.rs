use std::fmt::Debug;

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    Stream,
};

use crate::{
    core::close::CloseCode,
    serializer::serializer::SerializerType,
};

/// Data received from a [`Transport`].
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Data that should be perceived as a health check and immediately sent back to the sender.
    Ping(Vec<u8>),
    /// A single text frame carrying a serialized WAMP message.
    Text(String),
    /// A binary frame.
    ///
    /// The `wamp.2.json` subprotocol is text-only, so binary frames are reported for the session
    /// to reject as protocol violations.
    Binary(Vec<u8>),
    /// The transport finished its close handshake.
    Closed {
        code: Option<u16>,
        reason: String,
    },
}

/// Data sent over a [`Transport`].
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// A reply to a health check.
    Pong(Vec<u8>),
    /// A single text frame carrying a serialized WAMP message.
    Text(String),
    /// Initiates the close handshake with the given close code.
    Close(CloseCode),
}

/// A transport, over which WAMP messages can be sent and received.
///
/// Implemented as a [`Stream`] and [`Sink`] that extracts out meaningful frames. Transport
/// failures surface as stream errors and are handled at higher layers.
pub trait Transport:
    Send
    + Stream<Item = Result<TransportEvent>>
    + Sink<TransportCommand, Error = Error>
    + Unpin
    + Debug
{
}

/// A factory for creating a new [`Transport`].
pub trait TransportFactory<S>: Send + Sync {
    /// Creates a new [`Transport`] for WAMP messaging.
    fn new_transport(&self, stream: S, serializer_type: SerializerType) -> Box<dyn Transport>;
}
