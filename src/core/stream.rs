use std::{
    pin::Pin,
    task,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    SinkExt,
    Stream,
    StreamExt,
};

use crate::{
    core::close::CloseCode,
    message::message::Message,
    serializer::serializer::{
        InvalidMessage,
        Serializer,
    },
    transport::transport::{
        Transport,
        TransportCommand,
        TransportEvent,
    },
};

/// An event produced by a [`MessageStream`].
pub enum StreamEvent {
    Ping(Vec<u8>),
    Message(Message),
    /// A text frame that did not decode into a message.
    Invalid(InvalidMessage),
    /// A binary frame, which the text-only subprotocol forbids.
    Binary,
    /// The transport finished its close handshake.
    Closed {
        code: Option<u16>,
        reason: String,
    },
}

/// A command written into a [`MessageStream`].
pub enum StreamCommand {
    Pong(Vec<u8>),
    Message(Message),
    Close(CloseCode),
}

/// A stream of WAMP messages over a transport, using a serializer to translate between frames
/// and messages.
pub struct MessageStream {
    transport: Box<dyn Transport>,
    serializer: Box<dyn Serializer>,
}

impl MessageStream {
    pub fn new(transport: Box<dyn Transport>, serializer: Box<dyn Serializer>) -> Self {
        Self {
            transport,
            serializer,
        }
    }
}

impl Stream for MessageStream {
    type Item = Result<StreamEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        match futures_util::ready!(self.transport.poll_next_unpin(cx)) {
            Some(Ok(TransportEvent::Ping(data))) => {
                task::Poll::Ready(Some(Ok(StreamEvent::Ping(data))))
            }
            Some(Ok(TransportEvent::Text(text))) => {
                let event = match self.serializer.deserialize(&text) {
                    Ok(message) => StreamEvent::Message(message),
                    Err(invalid) => StreamEvent::Invalid(invalid),
                };
                task::Poll::Ready(Some(Ok(event)))
            }
            Some(Ok(TransportEvent::Binary(_))) => task::Poll::Ready(Some(Ok(StreamEvent::Binary))),
            Some(Ok(TransportEvent::Closed { code, reason })) => {
                task::Poll::Ready(Some(Ok(StreamEvent::Closed { code, reason })))
            }
            Some(Err(err)) => task::Poll::Ready(Some(Err(err))),
            None => task::Poll::Ready(None),
        }
    }
}

impl Sink<StreamCommand> for MessageStream {
    type Error = Error;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_ready_unpin(cx)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: StreamCommand,
    ) -> std::result::Result<(), Self::Error> {
        let command = match item {
            StreamCommand::Pong(data) => TransportCommand::Pong(data),
            StreamCommand::Message(message) => {
                TransportCommand::Text(self.serializer.serialize(&message)?)
            }
            StreamCommand::Close(code) => TransportCommand::Close(code),
        };
        self.transport.start_send_unpin(command)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_flush_unpin(cx)
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_close_unpin(cx)
    }
}
