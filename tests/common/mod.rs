// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::{
    pin::Pin,
    task,
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use futures_util::{
    Sink,
    Stream,
};
use tokio::sync::mpsc::{
    unbounded_channel,
    UnboundedReceiver,
    UnboundedSender,
};
use wamp_peer::{
    core::close::CloseCode,
    peer::{
        connector::connector::{
            Connection,
            Connector,
            ConnectorFactory,
        },
        Peer,
        PeerConfig,
    },
    serializer::serializer::SerializerType,
    transport::transport::{
        Transport,
        TransportCommand,
        TransportEvent,
        TransportFactory,
    },
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A transport over in-memory channels, so tests can play the router side of a connection with
/// literal wire frames.
#[derive(Debug)]
pub struct ChannelTransport {
    event_rx: UnboundedReceiver<Result<TransportEvent>>,
    command_tx: UnboundedSender<TransportCommand>,
}

impl Transport for ChannelTransport {}

impl Stream for ChannelTransport {
    type Item = Result<TransportEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.event_rx.poll_recv(cx)
    }
}

impl Sink<TransportCommand> for ChannelTransport {
    type Error = Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: TransportCommand) -> Result<(), Self::Error> {
        self.command_tx
            .send(item)
            .map_err(|_| Error::msg("router side of the transport is closed"))
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_close(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }
}

/// The router end of a [`ChannelTransport`].
pub struct FakeRouter {
    event_tx: UnboundedSender<Result<TransportEvent>>,
    command_rx: UnboundedReceiver<TransportCommand>,
}

impl FakeRouter {
    /// Delivers a text frame to the peer.
    pub fn send_text(&self, text: &str) {
        self.event_tx
            .send(Ok(TransportEvent::Text(text.to_owned())))
            .unwrap();
    }

    /// Delivers a binary frame to the peer.
    pub fn send_binary(&self, data: &[u8]) {
        self.event_tx
            .send(Ok(TransportEvent::Binary(data.to_vec())))
            .unwrap();
    }

    /// Reports the transport as closed to the peer.
    pub fn send_closed(&self, code: u16, reason: &str) {
        self.event_tx
            .send(Ok(TransportEvent::Closed {
                code: Some(code),
                reason: reason.to_owned(),
            }))
            .unwrap();
    }

    /// Reports a transport failure to the peer.
    pub fn fail(&self, error: &str) {
        self.event_tx.send(Err(Error::msg(error.to_owned()))).unwrap();
    }

    async fn next_command(&mut self) -> TransportCommand {
        tokio::time::timeout(RECV_TIMEOUT, self.command_rx.recv())
            .await
            .expect("timed out waiting for a frame from the peer")
            .expect("peer closed the transport without the expected frame")
    }

    /// Receives the next frame from the peer, which must be a text frame.
    pub async fn expect_text(&mut self) -> String {
        match self.next_command().await {
            TransportCommand::Text(text) => text,
            command => panic!("expected a text frame, got {command:?}"),
        }
    }

    /// Receives the next frame from the peer, which must be a close frame.
    pub async fn expect_close(&mut self) -> CloseCode {
        match self.next_command().await {
            TransportCommand::Close(code) => code,
            command => panic!("expected a close frame, got {command:?}"),
        }
    }

    /// Asserts that the peer sends nothing for a short grace period.
    pub async fn expect_silence(&mut self) {
        match tokio::time::timeout(Duration::from_millis(100), self.command_rx.recv()).await {
            Err(_) => (),
            Ok(None) => (),
            Ok(Some(command)) => panic!("expected no frames, got {command:?}"),
        }
    }
}

pub fn channel_transport_pair() -> (Box<dyn Transport>, FakeRouter) {
    let (event_tx, event_rx) = unbounded_channel();
    let (command_tx, command_rx) = unbounded_channel();
    (
        Box::new(ChannelTransport {
            event_rx,
            command_tx,
        }),
        FakeRouter {
            event_tx,
            command_rx,
        },
    )
}

struct NoConnector {}

#[async_trait]
impl Connector<()> for NoConnector {
    async fn connect(&self, _: &PeerConfig, _: &str) -> Result<Connection<()>> {
        Err(Error::msg("this peer only supports direct connections"))
    }
}

pub struct NoConnectorFactory {}

impl ConnectorFactory<()> for NoConnectorFactory {
    fn new_connector(&self) -> Box<dyn Connector<()> + Send> {
        Box::new(NoConnector {})
    }
}

pub struct NoTransportFactory {}

impl TransportFactory<()> for NoTransportFactory {
    fn new_transport(&self, _: (), _: SerializerType) -> Box<dyn Transport> {
        unimplemented!("this peer only supports direct connections")
    }
}

/// Creates a peer wired to a [`FakeRouter`] over an in-memory transport.
pub async fn connected_peer(name: &str) -> (Peer<()>, FakeRouter) {
    let mut config = PeerConfig::default();
    config.name = name.to_owned();
    let peer = Peer::new(
        config,
        Box::new(NoConnectorFactory {}),
        Box::new(NoTransportFactory {}),
    )
    .unwrap();
    let (transport, router) = channel_transport_pair();
    peer.direct_connect(transport).await.unwrap();
    (peer, router)
}

/// Drives the peer through the session establishment handshake.
pub async fn join_realm(peer: &Peer<()>, router: &mut FakeRouter, realm: &str, session_id: u64) {
    let (result, ()) = tokio::join!(peer.join_realm(realm), async {
        let hello = router.expect_text().await;
        assert!(
            hello.starts_with(&format!(r#"[1,"{realm}""#)),
            "expected HELLO for {realm}, got {hello}"
        );
        router.send_text(&format!(r#"[2,{session_id},{{"roles":{{"broker":{{}},"dealer":{{}}}}}}]"#));
    });
    result.unwrap();
}
