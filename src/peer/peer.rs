use std::sync::Arc;

use anyhow::{
    Error,
    Result,
};
use futures_util::lock::Mutex;
use log::{
    error,
    info,
};
use tokio::sync::{
    broadcast::{
        self,
        error::RecvError,
    },
    mpsc::{
        unbounded_channel,
        UnboundedReceiver,
        UnboundedSender,
    },
};

use crate::{
    core::{
        hash::{
            HashMap,
            HashSet,
        },
        id::Id,
        publish_options::PublishOptions,
        roles::PeerRole,
        service::{
            Service,
            ServiceEvent,
            ServiceHandle,
        },
        types::{
            Dictionary,
            Value,
        },
        uri::Uri,
    },
    peer::{
        connector::connector::ConnectorFactory,
        session::{
            CallEvent,
            ProcedureEvent,
            PublicationEvent,
            PublishedEvent,
            RpcCall,
            Session,
            SessionEvent,
            SessionHandle,
            SubscriptionEvent,
            Trigger,
        },
    },
    serializer::serializer::{
        new_serializer,
        SerializerType,
    },
    transport::transport::{
        Transport,
        TransportFactory,
    },
};

const DEFAULT_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Configuration for WebSocket-specific WAMP connections.
#[derive(Debug, Default)]
pub struct WebSocketConfig {
    /// Additional headers to include in the WebSocket handshake request.
    pub headers: HashMap<String, String>,
}

/// Configuration for a [`Peer`].
#[derive(Debug)]
pub struct PeerConfig {
    /// Name of the peer, mostly for logging.
    pub name: String,
    /// Agent name, communicated to the router in the handshake.
    pub agent: String,
    /// Roles implemented by the peer, advertised when joining a realm.
    pub roles: HashSet<PeerRole>,
    /// Additional configuration for WebSocket-specific connections.
    pub web_socket: Option<WebSocketConfig>,
}

impl PeerConfig {
    fn validate(&self) -> Result<()> {
        if self.roles.is_empty() {
            return Err(Error::msg("at least one role is required"));
        }
        Ok(())
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_AGENT.to_owned(),
            agent: DEFAULT_AGENT.to_owned(),
            roles: HashSet::from_iter(PeerRole::ALL),
            web_socket: None,
        }
    }
}

struct PeerState {
    service: ServiceHandle,
    session: SessionHandle,

    trigger_tx: UnboundedSender<Trigger>,
}

/// A WAMP peer (a.k.a., client) that connects to a WAMP router, establishes sessions in a realm,
/// and interacts with resources in the realm.
///
/// Operations that create a resource (subscriptions, registrations, calls, acknowledged
/// publications) hand back an event channel. The channel emits the lifecycle of that one
/// operation and closes right after its terminal event; see [`SubscriptionEvent`],
/// [`ProcedureEvent`], [`CallEvent`], and [`PublicationEvent`].
pub struct Peer<S> {
    config: PeerConfig,
    connector_factory: Box<dyn ConnectorFactory<S>>,
    transport_factory: Box<dyn TransportFactory<S>>,

    drop_tx: broadcast::Sender<()>,

    peer_state: Arc<Mutex<Option<PeerState>>>,
}

impl<S> Peer<S>
where
    S: Send + 'static,
{
    /// Creates a new peer.
    pub fn new(
        config: PeerConfig,
        connector_factory: Box<dyn ConnectorFactory<S>>,
        transport_factory: Box<dyn TransportFactory<S>>,
    ) -> Result<Self> {
        config.validate()?;
        let (drop_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            connector_factory,
            transport_factory,
            drop_tx,
            peer_state: Arc::new(Mutex::new(None)),
        })
    }

    /// Connects to a router.
    ///
    /// This method merely establishes a network connection with the router. It does not establish
    /// any WAMP session. This allows the underlying network connection to be reused across
    /// multiple WAMP sessions, if the router allows.
    ///
    /// The connection and message service is maintained asynchronously. If the peer loses
    /// connection to the router, the connection is dropped in the background and methods
    /// depending on the connection will fail. The peer can reconnect to the router by calling
    /// this method again.
    pub async fn connect(&self, uri: &str) -> Result<()> {
        let connector = self.connector_factory.new_connector();
        let connection = connector.connect(&self.config, uri).await?;
        info!(
            "WAMP connection established with {uri} for peer {}",
            self.config.name
        );

        let transport = self
            .transport_factory
            .new_transport(connection.stream, connection.serializer);
        self.direct_connect(transport).await
    }

    /// Directly connects to a router over the given transport.
    ///
    /// Useful for non-WebSocket transports, such as in-memory channels in tests.
    pub async fn direct_connect(&self, transport: Box<dyn Transport>) -> Result<()> {
        let serializer = new_serializer(SerializerType::Json);
        let service = Service::new(self.config.name.clone(), transport, serializer);
        let service_event_rx = service.event_rx();
        let end_rx = service.end_rx();
        let drop_rx = self.drop_tx.subscribe();

        let service_handle = service.start();

        let (session, trigger_rx) =
            Session::new(self.config.name.clone(), service_handle.message_tx());
        let session_handle = session.session_handle();
        let trigger_tx = session.trigger_tx();
        tokio::spawn(Self::session_evaluator(
            session,
            self.peer_state.clone(),
            trigger_rx,
            service_event_rx,
            end_rx,
            drop_rx,
        ));

        let mut peer_state = self.peer_state.lock().await;
        *peer_state = Some(PeerState {
            service: service_handle,
            session: session_handle,
            trigger_tx,
        });

        Ok(())
    }

    /// The session evaluator: the single task that owns the session record.
    ///
    /// Application triggers and inbound service events are processed one at a time, so all
    /// registry and state mutation is serialized here.
    async fn session_evaluator(
        session: Session,
        peer_state: Arc<Mutex<Option<PeerState>>>,
        mut trigger_rx: UnboundedReceiver<Trigger>,
        mut service_event_rx: broadcast::Receiver<ServiceEvent>,
        mut end_rx: broadcast::Receiver<()>,
        mut drop_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                trigger = trigger_rx.recv() => {
                    match trigger {
                        Some(trigger) => session.handle_trigger(trigger).await,
                        // The peer and every outstanding invocation responder are gone.
                        None => break,
                    }
                }
                event = service_event_rx.recv() => {
                    match event {
                        Ok(event) => session.handle_service_event(event).await,
                        Err(RecvError::Closed) => {
                            session.handle_service_event(ServiceEvent::Closed {
                                code: None,
                                reason: String::default(),
                            })
                            .await;
                            break;
                        }
                        Err(RecvError::Lagged(count)) => {
                            error!(
                                "Peer session {} lost {count} inbound messages",
                                session.name()
                            );
                            session.handle_service_event(ServiceEvent::Failed(
                                "inbound message backlog overflowed".to_owned(),
                            ))
                            .await;
                        }
                    }
                }
                // Service ended; no more I/O is possible.
                _ = end_rx.recv() => {
                    session.handle_service_event(ServiceEvent::Closed {
                        code: None,
                        reason: String::default(),
                    })
                    .await;
                    break;
                }
                _ = drop_rx.recv() => break,
            }

            if session.terminal().await {
                break;
            }
        }

        info!("Peer session {} finished", session.name());
        peer_state.lock().await.take();
    }

    async fn get_from_peer_state<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: Fn(&PeerState) -> T,
    {
        match &*self.peer_state.lock().await {
            Some(peer_state) => Ok(f(peer_state)),
            None => Err(Error::msg("peer is not connected")),
        }
    }

    fn send_trigger(trigger_tx: &UnboundedSender<Trigger>, trigger: Trigger) -> Result<()> {
        trigger_tx
            .send(trigger)
            .map_err(|_| Error::msg("peer session has ended"))
    }

    /// The receiver channel for session-wide lifecycle events.
    pub async fn session_event_rx(&self) -> Result<broadcast::Receiver<SessionEvent>> {
        self.get_from_peer_state(|peer_state| peer_state.session.session_event_rx())
            .await
    }

    /// The current session ID, as given by the router.
    pub async fn current_session_id(&self) -> Result<Option<Id>> {
        let session = self
            .get_from_peer_state(|peer_state| peer_state.session.clone())
            .await?;
        Ok(session.current_session_id().await)
    }

    /// Joins the realm, establishing a WAMP session.
    ///
    /// The session exists for as long as the router allows it to. The session will be lost in
    /// the following scenarios:
    /// 1. [`Self::leave_realm`] or [`Self::shutdown`] is called.
    /// 1. The router terminates the session due to an error.
    /// 1. The underlying connection to the router is lost.
    ///
    /// To join a different realm, [`Self::leave_realm`] should be called first.
    pub async fn join_realm(&self, realm: &str) -> Result<()> {
        let (trigger_tx, mut session_event_rx) = self
            .get_from_peer_state(|peer_state| {
                (
                    peer_state.trigger_tx.clone(),
                    peer_state.session.session_event_rx(),
                )
            })
            .await?;

        let realm = Uri::try_from(realm)?;
        let mut roles = Dictionary::default();
        for role in PeerRole::ALL {
            if self.config.roles.contains(&role) {
                roles.insert(
                    role.key_for_details().to_owned(),
                    Value::Dictionary(Dictionary::default()),
                );
            }
        }
        let details = Dictionary::from_iter([("roles".to_owned(), Value::Dictionary(roles))]);

        Self::send_trigger(
            &trigger_tx,
            Trigger::Join {
                realm: realm.clone(),
                details,
            },
        )?;

        loop {
            match session_event_rx.recv().await {
                Ok(SessionEvent::RealmJoined { realm: joined }) if joined == realm => {
                    return Ok(())
                }
                Ok(SessionEvent::Aborted(error)) => return Err(error.into_error()),
                Ok(_) => (),
                Err(err) => return Err(Error::new(err)),
            }
        }
    }

    /// Leaves the realm, closing the WAMP session.
    ///
    /// Every open operation channel receives a terminal event before this method returns.
    pub async fn leave_realm(&self) -> Result<()> {
        let (trigger_tx, mut session_event_rx) = self
            .get_from_peer_state(|peer_state| {
                (
                    peer_state.trigger_tx.clone(),
                    peer_state.session.session_event_rx(),
                )
            })
            .await?;

        Self::send_trigger(&trigger_tx, Trigger::Leave)?;

        loop {
            match session_event_rx.recv().await {
                Ok(SessionEvent::RealmLeft { .. }) => return Ok(()),
                Ok(SessionEvent::Aborted(error)) => return Err(error.into_error()),
                Ok(_) => (),
                Err(err) => return Err(Error::new(err)),
            }
        }
    }

    /// Shuts the session down, leaving the realm (if joined) and closing the transport.
    pub async fn shutdown(&self) -> Result<()> {
        let (trigger_tx, mut session_event_rx) = self
            .get_from_peer_state(|peer_state| {
                (
                    peer_state.trigger_tx.clone(),
                    peer_state.session.session_event_rx(),
                )
            })
            .await?;

        Self::send_trigger(&trigger_tx, Trigger::Shutdown)?;

        loop {
            match session_event_rx.recv().await {
                Ok(SessionEvent::Shutdown) => return Ok(()),
                Ok(SessionEvent::Aborted(error)) => return Err(error.into_error()),
                Ok(_) => (),
                Err(err) => return Err(Error::new(err)),
            }
        }
    }

    /// Disconnects from the router, abandoning the network connection without a WAMP-level
    /// goodbye. Prefer [`Self::shutdown`] for a clean exit.
    pub async fn disconnect(&self) -> Result<()> {
        let mut peer_state = self.peer_state.lock().await;

        if let Some(peer_state) = peer_state.take() {
            peer_state.service.cancel()?;
            peer_state.service.join().await?;
        }
        Ok(())
    }

    /// Subscribes to a topic in the realm.
    ///
    /// The returned channel emits the subscription's lifecycle, starting with
    /// [`SubscriptionEvent::Established`] once the router accepts the subscription, followed by
    /// one [`SubscriptionEvent::Event`] per published event. The channel closes after its
    /// terminal event, when the peer unsubscribes or the session ends.
    pub async fn subscribe(&self, topic: Uri) -> Result<UnboundedReceiver<SubscriptionEvent>> {
        let trigger_tx = self
            .get_from_peer_state(|peer_state| peer_state.trigger_tx.clone())
            .await?;
        let (event_tx, event_rx) = unbounded_channel();
        Self::send_trigger(&trigger_tx, Trigger::Subscribe { topic, event_tx })?;
        Ok(event_rx)
    }

    /// Removes a subscription.
    ///
    /// The subscription ID is received on the subscription's event channel. Unknown subscription
    /// IDs are silently ignored.
    pub async fn unsubscribe(&self, subscription: Id) -> Result<()> {
        let trigger_tx = self
            .get_from_peer_state(|peer_state| peer_state.trigger_tx.clone())
            .await?;
        Self::send_trigger(&trigger_tx, Trigger::Unsubscribe { subscription })
    }

    /// Publishes an event to a topic, without acknowledgement.
    pub async fn publish(&self, topic: Uri, event: PublishedEvent) -> Result<()> {
        self.publish_with_options(topic, event, PublishOptions::default())
            .await?;
        Ok(())
    }

    /// Publishes an event to a topic.
    ///
    /// If acknowledgement is requested, the returned channel emits one terminal
    /// [`PublicationEvent`]. Otherwise the publication is fire-and-forget and the channel closes
    /// without emitting anything.
    pub async fn publish_with_options(
        &self,
        topic: Uri,
        event: PublishedEvent,
        options: PublishOptions,
    ) -> Result<UnboundedReceiver<PublicationEvent>> {
        let trigger_tx = self
            .get_from_peer_state(|peer_state| peer_state.trigger_tx.clone())
            .await?;
        let (event_tx, event_rx) = unbounded_channel();
        Self::send_trigger(
            &trigger_tx,
            Trigger::Publish {
                topic,
                event,
                options,
                event_tx,
            },
        )?;
        Ok(event_rx)
    }

    /// Registers a procedure in the realm.
    ///
    /// The returned channel emits the registration's lifecycle, starting with
    /// [`ProcedureEvent::Registered`] once the router accepts the registration, followed by one
    /// [`ProcedureEvent::Invocation`] per call routed to this peer. Each invocation must be
    /// answered through its responder.
    pub async fn register(&self, procedure: Uri) -> Result<UnboundedReceiver<ProcedureEvent>> {
        let trigger_tx = self
            .get_from_peer_state(|peer_state| peer_state.trigger_tx.clone())
            .await?;
        let (event_tx, event_rx) = unbounded_channel();
        Self::send_trigger(
            &trigger_tx,
            Trigger::Register {
                procedure,
                event_tx,
            },
        )?;
        Ok(event_rx)
    }

    /// Removes a procedure registration.
    ///
    /// The registration ID is received on the registration's event channel. Unknown registration
    /// IDs are silently ignored.
    pub async fn unregister(&self, registration: Id) -> Result<()> {
        let trigger_tx = self
            .get_from_peer_state(|peer_state| peer_state.trigger_tx.clone())
            .await?;
        Self::send_trigger(&trigger_tx, Trigger::Unregister { registration })
    }

    /// Calls a procedure in the realm.
    ///
    /// The returned channel emits exactly one terminal [`CallEvent`].
    pub async fn call(
        &self,
        procedure: Uri,
        rpc_call: RpcCall,
    ) -> Result<UnboundedReceiver<CallEvent>> {
        let trigger_tx = self
            .get_from_peer_state(|peer_state| peer_state.trigger_tx.clone())
            .await?;
        let (event_tx, event_rx) = unbounded_channel();
        Self::send_trigger(
            &trigger_tx,
            Trigger::Call {
                procedure,
                rpc_call,
                event_tx,
            },
        )?;
        Ok(event_rx)
    }
}

impl<S> Drop for Peer<S> {
    fn drop(&mut self) {
        self.drop_tx.send(()).ok();
    }
}
