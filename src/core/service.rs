use anyhow::{
    Error,
    Result,
};
use futures_util::{
    SinkExt,
    StreamExt,
};
use log::error;
use tokio::{
    sync::{
        broadcast,
        mpsc::{
            unbounded_channel,
            UnboundedReceiver,
            UnboundedSender,
        },
    },
    task::JoinHandle,
};

use crate::{
    core::{
        close::CloseCode,
        stream::{
            MessageStream,
            StreamCommand,
            StreamEvent,
        },
    },
    message::message::Message,
    serializer::serializer::{
        InvalidMessage,
        Serializer,
    },
    transport::transport::Transport,
};

/// An inbound event reported by a [`Service`] for session-level handling.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// A WAMP message.
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
    /// The transport failed.
    Failed(String),
}

/// An outbound command written into a [`Service`].
#[derive(Debug, Clone)]
pub enum ServiceMessage {
    /// Sends a WAMP message.
    Message(Message),
    /// Initiates the transport close handshake and ends the service.
    Close(CloseCode),
}

/// A handle to an asynchronously-running [`Service`].
pub struct ServiceHandle {
    start_handle: JoinHandle<()>,
    cancel_tx: broadcast::Sender<()>,
    message_tx: UnboundedSender<ServiceMessage>,
}

impl ServiceHandle {
    /// Joins the task running the service.
    pub async fn join(self) -> Result<()> {
        self.start_handle.await.map_err(Error::new)
    }

    /// Cancels the service.
    ///
    /// Cancellation abandons the transport without a close handshake. Sessions close the
    /// transport with a [`ServiceMessage::Close`] command instead.
    pub fn cancel(&self) -> Result<()> {
        self.cancel_tx.send(()).map(|_| ()).map_err(Error::new)
    }

    /// The message transmission channel.
    pub fn message_tx(&self) -> UnboundedSender<ServiceMessage> {
        self.message_tx.clone()
    }
}

/// The core asynchronous service that sends and receives WAMP messages over an underlying
/// transport.
///
/// The goal of this module is to provide a common layer for WAMP messaging. Received events are
/// passed to a channel for the session layer to process; the service itself answers pings and
/// performs no WAMP-level handling.
///
/// This type assumes that errors are handled higher up in the stack. Canceling the service *will
/// not* inject an ABORT message: the session is expected to send ABORT, then close the transport
/// with a [`ServiceMessage::Close`] command.
pub struct Service {
    name: String,
    stream: MessageStream,
    event_tx: broadcast::Sender<ServiceEvent>,
    end_tx: broadcast::Sender<()>,
    _end_rx: broadcast::Receiver<()>,
    cancel_tx: broadcast::Sender<()>,
    cancel_rx: broadcast::Receiver<()>,

    user_message_tx: UnboundedSender<ServiceMessage>,
    user_message_rx: UnboundedReceiver<ServiceMessage>,
}

impl Service {
    /// Creates a new service with the given transport and serialization.
    pub fn new(
        name: String,
        transport: Box<dyn Transport>,
        serializer: Box<dyn Serializer>,
    ) -> Self {
        let stream = MessageStream::new(transport, serializer);
        let (event_tx, _) = broadcast::channel(16);
        let (end_tx, end_rx) = broadcast::channel(1);
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let (user_message_tx, user_message_rx) = unbounded_channel();
        Self {
            name,
            stream,
            event_tx,
            end_tx,
            _end_rx: end_rx,
            cancel_tx,
            cancel_rx,
            user_message_tx,
            user_message_rx,
        }
    }

    /// The event receiver channel.
    pub fn event_rx(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_tx.subscribe()
    }

    /// The end receiver channel.
    pub fn end_rx(&self) -> broadcast::Receiver<()> {
        self.end_tx.subscribe()
    }

    /// Starts the service asynchronously.
    ///
    /// This method takes ownership of the service. All future interactions with the service
    /// should be made through the returned handle.
    pub fn start(self) -> ServiceHandle {
        let cancel_tx = self.cancel_tx.clone();
        let message_tx = self.user_message_tx.clone();
        let start_handle = tokio::spawn(self.run());
        ServiceHandle {
            start_handle,
            cancel_tx,
            message_tx,
        }
    }

    async fn run(mut self) {
        if let Err(err) = self.service_loop().await {
            error!("Service {} failed: {err:#}", self.name);
        }
        if let Err(err) = self.end().await {
            error!("Failed to end service {}: {err:#}", self.name);
        }
    }

    async fn service_loop(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                event = self.stream.next() => {
                    match event {
                        Some(Ok(StreamEvent::Ping(data))) => {
                            // Ping the message back.
                            self.stream.send(StreamCommand::Pong(data)).await?;
                        }
                        Some(Ok(StreamEvent::Message(message))) => {
                            self.event_tx.send(ServiceEvent::Message(message))?;
                        }
                        Some(Ok(StreamEvent::Invalid(invalid))) => {
                            self.event_tx.send(ServiceEvent::Invalid(invalid))?;
                        }
                        Some(Ok(StreamEvent::Binary)) => {
                            self.event_tx.send(ServiceEvent::Binary)?;
                        }
                        Some(Ok(StreamEvent::Closed { code, reason })) => {
                            self.event_tx.send(ServiceEvent::Closed { code, reason }).ok();
                            return Ok(());
                        }
                        Some(Err(err)) => {
                            self.event_tx.send(ServiceEvent::Failed(format!("{err:#}"))).ok();
                            return Err(err);
                        }
                        None => {
                            // The transport ended without a close handshake.
                            self.event_tx.send(ServiceEvent::Closed { code: None, reason: String::default() }).ok();
                            return Ok(());
                        }
                    }
                }
                message = self.user_message_rx.recv() => {
                    match message {
                        Some(ServiceMessage::Message(message)) => {
                            self.stream.send(StreamCommand::Message(message)).await?;
                        }
                        Some(ServiceMessage::Close(code)) => {
                            self.stream.send(StreamCommand::Close(code)).await?;
                            return Ok(());
                        }
                        None => {
                            return Err(Error::msg("user message stream closed"));
                        }
                    }
                }
                // We expect that cancellation is the correct way to abandon the service without
                // a close handshake.
                _ = self.cancel_rx.recv() => {
                    return Ok(());
                }
            }
        }
    }

    async fn end(&mut self) -> Result<()> {
        // Ignore error with the stream, since it may already be closed.
        self.stream.close().await.ok();
        self.end_tx.send(())?;
        Ok(())
    }
}
