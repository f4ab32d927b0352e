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
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{
        protocol::{
            frame::coding::CloseCode as WebSocketCloseCode,
            CloseFrame,
        },
        Message,
    },
    MaybeTlsStream,
    WebSocketStream,
};

use crate::{
    serializer::serializer::SerializerType,
    transport::transport::{
        Transport,
        TransportCommand,
        TransportEvent,
        TransportFactory,
    },
};

/// A transport implemented for a TCP stream using the WebSocket protocol.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WebSocketTransport {}

impl Stream for WebSocketTransport {
    type Item = Result<TransportEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        loop {
            match futures_util::ready!(self.stream.poll_next_unpin(cx)) {
                Some(Ok(message)) => match message {
                    Message::Ping(data) => {
                        return task::Poll::Ready(Some(Ok(TransportEvent::Ping(data.to_vec()))))
                    }
                    // The WebSocket layer keeps the connection alive on its own; pongs carry no
                    // meaning for the session.
                    Message::Pong(_) => continue,
                    Message::Text(text) => {
                        return task::Poll::Ready(Some(Ok(TransportEvent::Text(text.to_string()))))
                    }
                    Message::Binary(data) => {
                        return task::Poll::Ready(Some(Ok(TransportEvent::Binary(data.to_vec()))))
                    }
                    Message::Close(frame) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                            None => (None, String::default()),
                        };
                        return task::Poll::Ready(Some(Ok(TransportEvent::Closed { code, reason })));
                    }
                    _ => {
                        return task::Poll::Ready(Some(Err(Error::msg(
                            "unexpected websocket message",
                        ))))
                    }
                },
                Some(Err(err)) => return task::Poll::Ready(Some(Err(err.into()))),
                None => return task::Poll::Ready(None),
            }
        }
    }
}

impl Sink<TransportCommand> for WebSocketTransport {
    type Error = Error;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_ready_unpin(cx).map_err(Error::new)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: TransportCommand,
    ) -> std::result::Result<(), Self::Error> {
        let message = match item {
            TransportCommand::Pong(data) => Message::Pong(data.into()),
            TransportCommand::Text(text) => Message::Text(text.into()),
            TransportCommand::Close(code) => Message::Close(Some(CloseFrame {
                code: WebSocketCloseCode::from(code.code()),
                reason: "".into(),
            })),
        };
        self.stream.start_send_unpin(message).map_err(Error::new)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_flush_unpin(cx).map_err(Error::new)
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_close_unpin(cx).map_err(Error::new)
    }
}

/// A factory for [`WebSocketTransport`].
#[derive(Default)]
pub struct WebSocketTransportFactory {}

impl TransportFactory<WebSocketStream<MaybeTlsStream<TcpStream>>> for WebSocketTransportFactory {
    fn new_transport(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        _serializer_type: SerializerType,
    ) -> Box<dyn Transport> {
        Box::new(WebSocketTransport { stream })
    }
}
