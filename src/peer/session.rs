use std::{
    fmt::Debug,
    sync::Arc,
};

use anyhow::{
    Error,
    Result,
};
use log::{
    debug,
    info,
    warn,
};
use tokio::sync::{
    broadcast,
    mpsc::{
        unbounded_channel,
        UnboundedReceiver,
        UnboundedSender,
    },
    RwLock,
};

use crate::{
    core::{
        close::{
            CloseCode,
            CloseReason,
        },
        error::{
            InteractionError,
            WampError,
        },
        hash::HashMap,
        id::{
            Id,
            IdAllocator,
            SequentialIdAllocator,
        },
        publish_options::PublishOptions,
        service::{
            ServiceEvent,
            ServiceMessage,
        },
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::Uri,
    },
    message::{
        common::{
            abort_message_for_error,
            error_for_invocation,
            goodbye_and_out,
            goodbye_with_close_reason,
        },
        message::{
            CallMessage,
            ErrorMessage,
            EventMessage,
            GoodbyeMessage,
            HelloMessage,
            InvocationMessage,
            Message,
            PublishMessage,
            PublishedMessage,
            RegisterMessage,
            RegisteredMessage,
            ResultMessage,
            SubscribeMessage,
            SubscribedMessage,
            UnregisterMessage,
            UnregisteredMessage,
            UnsubscribeMessage,
            UnsubscribedMessage,
            WelcomeMessage,
            YieldMessage,
        },
    },
    serializer::serializer::InvalidMessage,
};

/// An event received over a subscription.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReceivedEvent {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// An event published to a topic.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PublishedEvent {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// The input of a procedure call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RpcCall {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// The output of a procedure, yielded by its callee.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RpcYield {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// The result of a procedure call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RpcResult {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// The failure of a procedure call, with an optional application payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub error: WampError,
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

impl RpcError {
    /// Creates a new error with no application payload.
    pub fn new(error: WampError) -> Self {
        Self {
            error,
            arguments: List::default(),
            arguments_keyword: Dictionary::default(),
        }
    }
}

impl From<WampError> for RpcError {
    fn from(value: WampError) -> Self {
        Self::new(value)
    }
}

/// An invocation of a procedure, delivered to the callee that registered it.
///
/// The callee must respond exactly once; responding consumes the invocation and sends a YIELD
/// or ERROR message back to the router. If the session leaves the realm before the response is
/// submitted, the response is dropped.
#[derive(Debug)]
pub struct Invocation {
    pub arguments: List,
    pub arguments_keyword: Dictionary,

    request_id: Id,
    trigger_tx: UnboundedSender<Trigger>,
}

impl Invocation {
    /// The invocation request ID.
    pub fn request_id(&self) -> Id {
        self.request_id
    }

    /// Responds to the invocation.
    pub fn respond(self, result: Result<RpcYield, RpcError>) {
        let trigger = match result {
            Ok(rpc_yield) => Trigger::Yield {
                request: self.request_id,
                rpc_yield,
            },
            Err(error) => Trigger::Error {
                request: self.request_id,
                error,
            },
        };
        // The session may have ended concurrently, in which case the response goes nowhere.
        self.trigger_tx.send(trigger).ok();
    }

    /// Responds to the invocation with a successful result.
    pub fn respond_ok(self, rpc_yield: RpcYield) {
        self.respond(Ok(rpc_yield))
    }

    /// Responds to the invocation with an error.
    pub fn respond_error(self, error: WampError) {
        self.respond(Err(RpcError::new(error)))
    }
}

/// An event on a subscription channel.
///
/// [`Self::Closed`], [`Self::Failed`], and [`Self::UnsubscribeFailed`] are terminal: they are
/// the last event on the channel, which closes immediately after.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// The router accepted the subscription.
    Established { subscription: Id },
    /// An event published to the subscribed topic.
    Event(ReceivedEvent),
    /// The subscription ended, by unsubscription or by the session ending cleanly.
    Closed,
    /// The subscription failed, either when it was requested or when the session ended.
    Failed(WampError),
    /// The unsubscribe request failed.
    UnsubscribeFailed(WampError),
}

/// An event on a procedure registration channel.
///
/// [`Self::Unregistered`], [`Self::Failed`], and [`Self::UnregisterFailed`] are terminal: they
/// are the last event on the channel, which closes immediately after.
#[derive(Debug)]
pub enum ProcedureEvent {
    /// The router accepted the registration.
    Registered { registration: Id },
    /// An invocation of the procedure, to be answered through its responder.
    Invocation(Invocation),
    /// The registration ended, by unregistration or by the session ending cleanly.
    Unregistered,
    /// The registration failed, either when it was requested or when the session ended.
    Failed(WampError),
    /// The unregister request failed.
    UnregisterFailed(WampError),
}

/// An event on a call channel. Every call channel emits exactly one event, which is terminal.
#[derive(Debug)]
pub enum CallEvent {
    /// The call succeeded.
    Result(RpcResult),
    /// The call failed.
    Failed(RpcError),
}

/// An event on a publication channel.
///
/// Both events are terminal. Publications made without acknowledgement emit no events at all;
/// their channel closes immediately.
#[derive(Debug)]
pub enum PublicationEvent {
    /// The router acknowledged the publication.
    Published { publication: Id },
    /// The publication failed.
    Failed(WampError),
}

/// A session-wide lifecycle event.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session joined a realm.
    RealmJoined { realm: Uri },
    /// The session left the realm, by its own GOODBYE or by the router's.
    RealmLeft {
        realm: Uri,
        initiated_by_router: bool,
    },
    /// The session shut down and closed its transport.
    Shutdown,
    /// The session aborted. The session is unusable afterwards.
    Aborted(WampError),
}

/// An input to the session state machine.
///
/// Application operations are packaged as triggers and processed one at a time, serialized with
/// inbound service events.
#[derive(Debug)]
pub(crate) enum Trigger {
    Join {
        realm: Uri,
        details: Dictionary,
    },
    Leave,
    Shutdown,
    Subscribe {
        topic: Uri,
        event_tx: UnboundedSender<SubscriptionEvent>,
    },
    Unsubscribe {
        subscription: Id,
    },
    Publish {
        topic: Uri,
        event: PublishedEvent,
        options: PublishOptions,
        event_tx: UnboundedSender<PublicationEvent>,
    },
    Register {
        procedure: Uri,
        event_tx: UnboundedSender<ProcedureEvent>,
    },
    Unregister {
        registration: Id,
    },
    Call {
        procedure: Uri,
        rpc_call: RpcCall,
        event_tx: UnboundedSender<CallEvent>,
    },
    Yield {
        request: Id,
        rpc_yield: RpcYield,
    },
    Error {
        request: Id,
        error: RpcError,
    },
}

#[derive(Debug)]
struct JoiningState {
    realm: Uri,
}

#[derive(Debug)]
struct LeavingState {
    realm: Uri,
}

#[derive(Debug)]
struct ShuttingDownState {
    realm: Uri,
}

struct JoinedState {
    session_id: Id,
    realm: Uri,

    pending_subscriptions: HashMap<Id, UnboundedSender<SubscriptionEvent>>,
    pending_unsubscriptions: HashMap<Id, (Id, UnboundedSender<SubscriptionEvent>)>,
    subscriptions: HashMap<Id, UnboundedSender<SubscriptionEvent>>,
    pending_registrations: HashMap<Id, UnboundedSender<ProcedureEvent>>,
    pending_unregistrations: HashMap<Id, (Id, UnboundedSender<ProcedureEvent>)>,
    registrations: HashMap<Id, UnboundedSender<ProcedureEvent>>,
    pending_calls: HashMap<Id, UnboundedSender<CallEvent>>,
    pending_publications: HashMap<Id, UnboundedSender<PublicationEvent>>,
}

impl JoinedState {
    fn new(session_id: Id, realm: Uri) -> Self {
        Self {
            session_id,
            realm,
            pending_subscriptions: HashMap::default(),
            pending_unsubscriptions: HashMap::default(),
            subscriptions: HashMap::default(),
            pending_registrations: HashMap::default(),
            pending_unregistrations: HashMap::default(),
            registrations: HashMap::default(),
            pending_calls: HashMap::default(),
            pending_publications: HashMap::default(),
        }
    }
}

impl Debug for JoinedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[derive(Debug)]
        #[allow(unused)]
        struct DebugJoinedState<'a> {
            session_id: &'a Id,
            realm: &'a Uri,
        }

        DebugJoinedState {
            session_id: &self.session_id,
            realm: &self.realm,
        }
        .fmt(f)
    }
}

#[derive(Debug, Default)]
enum SessionState {
    #[default]
    Initial,
    Joining(JoiningState),
    Joined(JoinedState),
    Leaving(LeavingState),
    ShuttingDown(ShuttingDownState),
    ShutDown,
    Aborted,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Joining(_) => "JOINING",
            Self::Joined(_) => "JOINED",
            Self::Leaving(_) => "LEAVING",
            Self::ShuttingDown(_) => "SHUTTING_DOWN",
            Self::ShutDown => "SHUT_DOWN",
            Self::Aborted => "ABORTED",
        }
    }
}

/// How an abort came about, which decides what the session still says on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortSource {
    /// The other side violated the protocol. ABORT is sent and the transport is closed with a
    /// protocol error code.
    ProtocolViolation,
    /// The local application misused the session. ABORT is sent and the transport is closed
    /// normally.
    LocalMisuse,
    /// The router sent ABORT. Nothing is echoed back; the transport is closed normally.
    Router,
    /// The transport is gone. Nothing can be sent.
    Transport,
}

/// A handle to an asynchronously-running peer session.
pub struct SessionHandle {
    state: Arc<RwLock<SessionState>>,
    session_event_rx: broadcast::Receiver<SessionEvent>,
}

impl Clone for SessionHandle {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            session_event_rx: self.session_event_rx.resubscribe(),
        }
    }
}

impl SessionHandle {
    /// The current session ID, as given by the router.
    ///
    /// Set while the session is established on a realm, and cleared once the session leaves it.
    pub async fn current_session_id(&self) -> Option<Id> {
        match &*self.state.read().await {
            SessionState::Joined(state) => Some(state.session_id),
            _ => None,
        }
    }

    /// The receiver channel for session-wide lifecycle events.
    pub fn session_event_rx(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_event_rx.resubscribe()
    }
}

/// The peer end of a WAMP session.
///
/// Runs a state machine over all session inputs: application operations arrive as [`Trigger`]s,
/// and router messages arrive as [`ServiceEvent`]s. Both are processed one at a time by a single
/// evaluator task, which is the only place the session record (state, registries, ID allocator)
/// is touched.
pub struct Session {
    name: String,
    service_message_tx: UnboundedSender<ServiceMessage>,
    trigger_tx: UnboundedSender<Trigger>,
    state: Arc<RwLock<SessionState>>,
    id_allocator: Arc<Box<dyn IdAllocator>>,
    session_event_tx: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Creates a new session over a service, along with the receiving end of its trigger queue.
    pub(crate) fn new(
        name: String,
        service_message_tx: UnboundedSender<ServiceMessage>,
    ) -> (Self, UnboundedReceiver<Trigger>) {
        let (trigger_tx, trigger_rx) = unbounded_channel();
        let (session_event_tx, _) = broadcast::channel(16);
        (
            Self {
                name,
                service_message_tx,
                trigger_tx,
                state: Arc::new(RwLock::new(SessionState::default())),
                id_allocator: Arc::new(Box::new(SequentialIdAllocator::default())),
                session_event_tx,
            },
            trigger_rx,
        )
    }

    /// The name of the session.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The transmitting end of the trigger queue.
    pub(crate) fn trigger_tx(&self) -> UnboundedSender<Trigger> {
        self.trigger_tx.clone()
    }

    /// Checks if the session is in a terminal state.
    pub async fn terminal(&self) -> bool {
        matches!(
            *self.state.read().await,
            SessionState::ShutDown | SessionState::Aborted
        )
    }

    /// Generates a handle to the session, which can be saved separately from the session's
    /// lifecycle.
    pub fn session_handle(&self) -> SessionHandle {
        SessionHandle {
            state: self.state.clone(),
            session_event_rx: self.session_event_tx.subscribe(),
        }
    }

    fn send_message(&self, message: Message) {
        let message_name = message.message_name();
        if self
            .service_message_tx
            .send(ServiceMessage::Message(message))
            .is_err()
        {
            warn!(
                "Peer {} failed to send {message_name}: service is not running",
                self.name
            );
        }
    }

    fn send_close(&self, code: CloseCode) {
        self.service_message_tx
            .send(ServiceMessage::Close(code))
            .ok();
    }

    fn notify(&self, event: SessionEvent) {
        self.session_event_tx.send(event).ok();
    }

    /// Handles an application trigger over the session state machine.
    pub(crate) async fn handle_trigger(&self, trigger: Trigger) {
        match trigger {
            Trigger::Join { realm, details } => self.handle_join(realm, details).await,
            Trigger::Leave => self.handle_leave().await,
            Trigger::Shutdown => self.handle_shutdown().await,
            Trigger::Subscribe { topic, event_tx } => self.handle_subscribe(topic, event_tx).await,
            Trigger::Unsubscribe { subscription } => self.handle_unsubscribe(subscription).await,
            Trigger::Publish {
                topic,
                event,
                options,
                event_tx,
            } => self.handle_publish(topic, event, options, event_tx).await,
            Trigger::Register {
                procedure,
                event_tx,
            } => self.handle_register(procedure, event_tx).await,
            Trigger::Unregister { registration } => self.handle_unregister(registration).await,
            Trigger::Call {
                procedure,
                rpc_call,
                event_tx,
            } => self.handle_call(procedure, rpc_call, event_tx).await,
            Trigger::Yield { request, rpc_yield } => self.handle_yield(request, rpc_yield).await,
            Trigger::Error { request, error } => self.handle_invocation_error(request, error).await,
        }
    }

    /// Handles an inbound service event over the session state machine.
    pub(crate) async fn handle_service_event(&self, event: ServiceEvent) {
        match event {
            ServiceEvent::Message(message) => self.handle_message(message).await,
            ServiceEvent::Invalid(invalid) => self.handle_invalid_message(invalid).await,
            ServiceEvent::Binary => self.handle_binary_message().await,
            ServiceEvent::Closed { code, reason } => {
                self.handle_transport_closed(code, reason).await
            }
            ServiceEvent::Failed(error) => self.handle_transport_failed(error).await,
        }
    }

    async fn handle_join(&self, realm: Uri, details: Dictionary) {
        {
            let mut state = self.state.write().await;
            match &*state {
                SessionState::Initial => {
                    *state = SessionState::Joining(JoiningState {
                        realm: realm.clone(),
                    });
                }
                _ => {
                    let state_name = state.name();
                    drop(state);
                    self.abort_for_misuse(format!(
                        "join attempted while session is {state_name}"
                    ))
                    .await;
                    return;
                }
            }
        }
        debug!("Peer {} is joining realm {realm}", self.name);
        self.send_message(Message::Hello(HelloMessage { realm, details }));
    }

    async fn handle_leave(&self) {
        let mut state = self.state.write().await;
        match std::mem::take(&mut *state) {
            SessionState::Joined(joined) => {
                *state = SessionState::Leaving(LeavingState {
                    realm: joined.realm.clone(),
                });
                drop(state);
                self.send_message(goodbye_with_close_reason(CloseReason::CloseRealm));
                self.drain_for_close(joined, CloseReason::CloseRealm).await;
            }
            joining @ SessionState::Joining(_) => {
                *state = joining;
                drop(state);
                self.abort_for_cancellation("session left before establishment")
                    .await;
            }
            SessionState::Aborted => *state = SessionState::Aborted,
            other => {
                let state_name = other.name();
                *state = other;
                drop(state);
                self.abort_for_misuse(format!("leave attempted while session is {state_name}"))
                    .await;
            }
        }
    }

    async fn handle_shutdown(&self) {
        let mut state = self.state.write().await;
        match std::mem::take(&mut *state) {
            SessionState::Initial => {
                *state = SessionState::ShutDown;
                drop(state);
                info!("Peer {} shut down before joining a realm", self.name);
                self.send_close(CloseCode::Normal);
                self.notify(SessionEvent::Shutdown);
            }
            joining @ SessionState::Joining(_) => {
                *state = joining;
                drop(state);
                self.abort_for_cancellation("session shut down before establishment")
                    .await;
            }
            SessionState::Joined(joined) => {
                *state = SessionState::ShuttingDown(ShuttingDownState {
                    realm: joined.realm.clone(),
                });
                drop(state);
                self.send_message(goodbye_with_close_reason(CloseReason::SystemShutdown));
                self.drain_for_close(joined, CloseReason::SystemShutdown)
                    .await;
            }
            SessionState::ShutDown => *state = SessionState::ShutDown,
            SessionState::Aborted => *state = SessionState::Aborted,
            other => {
                let state_name = other.name();
                *state = other;
                drop(state);
                self.abort_for_misuse(format!("shutdown attempted while session is {state_name}"))
                    .await;
            }
        }
    }

    async fn handle_subscribe(&self, topic: Uri, event_tx: UnboundedSender<SubscriptionEvent>) {
        let mut state = self.state.write().await;
        match &mut *state {
            SessionState::Joined(joined) => {
                let request = match self.id_allocator.generate_id().await {
                    Ok(request) => request,
                    Err(err) => {
                        drop(state);
                        event_tx
                            .send(SubscriptionEvent::Failed(WampError::from(&err)))
                            .ok();
                        self.abort_for_misuse(format!("failed to allocate a request id: {err}"))
                            .await;
                        return;
                    }
                };
                joined.pending_subscriptions.insert(request, event_tx);
                drop(state);
                self.send_message(Message::Subscribe(SubscribeMessage {
                    request,
                    options: Dictionary::default(),
                    topic,
                }));
            }
            _ => {
                let reason = format!("subscribe attempted while session is {}", state.name());
                drop(state);
                event_tx
                    .send(SubscriptionEvent::Failed(self.misuse_error(reason.clone())))
                    .ok();
                self.abort_for_misuse(reason).await;
            }
        }
    }

    async fn handle_unsubscribe(&self, subscription: Id) {
        let mut state = self.state.write().await;
        match &mut *state {
            SessionState::Joined(joined) => {
                // Unknown subscriptions are silently ignored.
                let event_tx = match joined.subscriptions.remove(&subscription) {
                    Some(event_tx) => event_tx,
                    None => return,
                };
                let request = match self.id_allocator.generate_id().await {
                    Ok(request) => request,
                    Err(err) => {
                        drop(state);
                        self.abort_for_misuse(format!("failed to allocate a request id: {err}"))
                            .await;
                        return;
                    }
                };
                joined
                    .pending_unsubscriptions
                    .insert(request, (subscription, event_tx));
                drop(state);
                self.send_message(Message::Unsubscribe(UnsubscribeMessage {
                    request,
                    subscribed_subscription: subscription,
                }));
            }
            _ => {
                let state_name = state.name();
                drop(state);
                self.abort_for_misuse(format!(
                    "unsubscribe attempted while session is {state_name}"
                ))
                .await;
            }
        }
    }

    async fn handle_publish(
        &self,
        topic: Uri,
        event: PublishedEvent,
        options: PublishOptions,
        event_tx: UnboundedSender<PublicationEvent>,
    ) {
        let mut state = self.state.write().await;
        match &mut *state {
            SessionState::Joined(joined) => {
                let request = match self.id_allocator.generate_id().await {
                    Ok(request) => request,
                    Err(err) => {
                        drop(state);
                        event_tx
                            .send(PublicationEvent::Failed(WampError::from(&err)))
                            .ok();
                        self.abort_for_misuse(format!("failed to allocate a request id: {err}"))
                            .await;
                        return;
                    }
                };
                if options.acknowledge {
                    joined.pending_publications.insert(request, event_tx);
                }
                drop(state);
                self.send_message(Message::Publish(PublishMessage {
                    request,
                    options: options.into_dictionary(),
                    topic,
                    arguments: event.arguments,
                    arguments_keyword: event.arguments_keyword,
                }));
                if !options.acknowledge {
                    // No response will ever correlate back, so the ID is done immediately. The
                    // event channel closes with no events (the sender was dropped above).
                    self.id_allocator.release_id(request).await;
                }
            }
            _ => {
                let reason = format!("publish attempted while session is {}", state.name());
                drop(state);
                event_tx
                    .send(PublicationEvent::Failed(self.misuse_error(reason.clone())))
                    .ok();
                self.abort_for_misuse(reason).await;
            }
        }
    }

    async fn handle_register(&self, procedure: Uri, event_tx: UnboundedSender<ProcedureEvent>) {
        let mut state = self.state.write().await;
        match &mut *state {
            SessionState::Joined(joined) => {
                let request = match self.id_allocator.generate_id().await {
                    Ok(request) => request,
                    Err(err) => {
                        drop(state);
                        event_tx
                            .send(ProcedureEvent::Failed(WampError::from(&err)))
                            .ok();
                        self.abort_for_misuse(format!("failed to allocate a request id: {err}"))
                            .await;
                        return;
                    }
                };
                joined.pending_registrations.insert(request, event_tx);
                drop(state);
                self.send_message(Message::Register(RegisterMessage {
                    request,
                    options: Dictionary::default(),
                    procedure,
                }));
            }
            _ => {
                let reason = format!("register attempted while session is {}", state.name());
                drop(state);
                event_tx
                    .send(ProcedureEvent::Failed(self.misuse_error(reason.clone())))
                    .ok();
                self.abort_for_misuse(reason).await;
            }
        }
    }

    async fn handle_unregister(&self, registration: Id) {
        let mut state = self.state.write().await;
        match &mut *state {
            SessionState::Joined(joined) => {
                // Unknown registrations are silently ignored.
                let event_tx = match joined.registrations.remove(&registration) {
                    Some(event_tx) => event_tx,
                    None => return,
                };
                let request = match self.id_allocator.generate_id().await {
                    Ok(request) => request,
                    Err(err) => {
                        drop(state);
                        self.abort_for_misuse(format!("failed to allocate a request id: {err}"))
                            .await;
                        return;
                    }
                };
                joined
                    .pending_unregistrations
                    .insert(request, (registration, event_tx));
                drop(state);
                self.send_message(Message::Unregister(UnregisterMessage {
                    request,
                    registered_registration: registration,
                }));
            }
            _ => {
                let state_name = state.name();
                drop(state);
                self.abort_for_misuse(format!(
                    "unregister attempted while session is {state_name}"
                ))
                .await;
            }
        }
    }

    async fn handle_call(
        &self,
        procedure: Uri,
        rpc_call: RpcCall,
        event_tx: UnboundedSender<CallEvent>,
    ) {
        let mut state = self.state.write().await;
        match &mut *state {
            SessionState::Joined(joined) => {
                let request = match self.id_allocator.generate_id().await {
                    Ok(request) => request,
                    Err(err) => {
                        drop(state);
                        event_tx
                            .send(CallEvent::Failed(RpcError::new(WampError::from(&err))))
                            .ok();
                        self.abort_for_misuse(format!("failed to allocate a request id: {err}"))
                            .await;
                        return;
                    }
                };
                joined.pending_calls.insert(request, event_tx);
                drop(state);
                self.send_message(Message::Call(CallMessage {
                    request,
                    options: Dictionary::default(),
                    procedure,
                    arguments: rpc_call.arguments,
                    arguments_keyword: rpc_call.arguments_keyword,
                }));
            }
            _ => {
                let reason = format!("call attempted while session is {}", state.name());
                drop(state);
                event_tx
                    .send(CallEvent::Failed(RpcError::new(
                        self.misuse_error(reason.clone()),
                    )))
                    .ok();
                self.abort_for_misuse(reason).await;
            }
        }
    }

    async fn handle_yield(&self, request: Id, rpc_yield: RpcYield) {
        // Responder output racing a session exit is dropped, not treated as misuse.
        if !matches!(*self.state.read().await, SessionState::Joined(_)) {
            debug!(
                "Peer {} dropped YIELD for request {request}: session is no longer established",
                self.name
            );
            return;
        }
        self.send_message(Message::Yield(YieldMessage {
            invocation_request: request,
            options: Dictionary::default(),
            arguments: rpc_yield.arguments,
            arguments_keyword: rpc_yield.arguments_keyword,
        }));
    }

    async fn handle_invocation_error(&self, request: Id, error: RpcError) {
        if !matches!(*self.state.read().await, SessionState::Joined(_)) {
            debug!(
                "Peer {} dropped ERROR for request {request}: session is no longer established",
                self.name
            );
            return;
        }
        self.send_message(error_for_invocation(
            request,
            &error.error,
            error.arguments,
            error.arguments_keyword,
        ));
    }

    async fn handle_message(&self, message: Message) {
        debug!(
            "Peer {} received {} message: {message:?}",
            self.name,
            message.message_name()
        );
        // Read the state kind separately from handling the message, so that handlers take their
        // own locks.
        #[derive(Clone, Copy)]
        enum StateKind {
            Initial,
            Joining,
            Joined,
            Leaving,
            ShuttingDown,
            ShutDown,
            Aborted,
        }
        let kind = match &*self.state.read().await {
            SessionState::Initial => StateKind::Initial,
            SessionState::Joining(_) => StateKind::Joining,
            SessionState::Joined(_) => StateKind::Joined,
            SessionState::Leaving(_) => StateKind::Leaving,
            SessionState::ShuttingDown(_) => StateKind::ShuttingDown,
            SessionState::ShutDown => StateKind::ShutDown,
            SessionState::Aborted => StateKind::Aborted,
        };

        match kind {
            StateKind::Initial => match message {
                // Late ERROR responses are not correlatable to anything and carry no state.
                Message::Error(_) => (),
                message => {
                    self.abort_for_protocol_violation(format!(
                        "received {} message before the session was ready",
                        message.message_name()
                    ))
                    .await
                }
            },
            StateKind::Joining => self.handle_message_while_joining(message).await,
            StateKind::Joined => self.handle_message_while_joined(message).await,
            StateKind::Leaving => self.handle_message_while_leaving(message).await,
            StateKind::ShuttingDown => self.handle_message_while_shutting_down(message).await,
            StateKind::ShutDown => match message {
                Message::Error(_) => (),
                message => {
                    self.abort_for_protocol_violation(format!(
                        "received {} message on a session that has shut down",
                        message.message_name()
                    ))
                    .await
                }
            },
            StateKind::Aborted => (),
        }
    }

    async fn handle_message_while_joining(&self, message: Message) {
        match message {
            Message::Welcome(message) => self.handle_welcome(message).await,
            Message::Abort(_) => {
                let error = WampError::try_from(&message)
                    .unwrap_or_else(|err| WampError::from(&err));
                self.abort(error, AbortSource::Router).await;
            }
            _ => {
                self.abort_for_protocol_violation(format!(
                    "received {} message while joining; expected WELCOME or ABORT",
                    message.message_name()
                ))
                .await
            }
        }
    }

    async fn handle_welcome(&self, message: WelcomeMessage) {
        let realm = {
            let mut state = self.state.write().await;
            let realm = match &*state {
                SessionState::Joining(joining) => joining.realm.clone(),
                _ => return,
            };
            *state = SessionState::Joined(JoinedState::new(message.session, realm.clone()));
            realm
        };
        self.id_allocator.reset().await;
        info!(
            "Peer {} established session {} on realm {realm}",
            self.name, message.session
        );
        self.notify(SessionEvent::RealmJoined { realm });
    }

    async fn handle_message_while_joined(&self, message: Message) {
        match message {
            Message::Abort(_) => {
                warn!("Peer {} aborted by router: {message:?}", self.name);
                let error = WampError::try_from(&message)
                    .unwrap_or_else(|err| WampError::from(&err));
                self.abort(error, AbortSource::Router).await;
            }
            Message::Goodbye(message) => self.handle_goodbye(message).await,
            Message::Error(message) => self.handle_error_response(message).await,
            Message::Subscribed(message) => self.handle_subscribed(message).await,
            Message::Unsubscribed(message) => self.handle_unsubscribed(message).await,
            Message::Event(message) => self.handle_event(message).await,
            Message::Published(message) => self.handle_published(message).await,
            Message::Registered(message) => self.handle_registered(message).await,
            Message::Unregistered(message) => self.handle_unregistered(message).await,
            Message::Invocation(message) => self.handle_invocation(message).await,
            Message::Result(message) => self.handle_result(message).await,
            message => {
                self.abort_for_protocol_violation(format!(
                    "received {} message on an established session",
                    message.message_name()
                ))
                .await
            }
        }
    }

    async fn handle_goodbye(&self, message: GoodbyeMessage) {
        if CloseReason::from_uri(&message.reason) == Some(CloseReason::GoodbyeAndOut) {
            self.abort_for_protocol_violation(
                "received GOODBYE acknowledgement without sending GOODBYE".to_owned(),
            )
            .await;
            return;
        }

        let system_shutdown =
            CloseReason::from_uri(&message.reason) == Some(CloseReason::SystemShutdown);
        let next = if system_shutdown {
            SessionState::ShutDown
        } else {
            SessionState::Initial
        };
        let joined = match self.exit_joined(next).await {
            Some(joined) => joined,
            None => return,
        };
        info!(
            "Peer {} left realm {} by router GOODBYE ({})",
            self.name, joined.realm, message.reason
        );
        self.send_message(goodbye_and_out());
        let realm = joined.realm.clone();
        self.drain_for_goodbye(joined, &message.reason).await;
        self.notify(SessionEvent::RealmLeft {
            realm,
            initiated_by_router: true,
        });
        if system_shutdown {
            self.send_close(CloseCode::Normal);
            self.notify(SessionEvent::Shutdown);
        }
    }

    async fn handle_error_response(&self, message: ErrorMessage) {
        let error = WampError::new(
            message.error.clone(),
            match message.details.get("message") {
                Some(Value::String(text)) => text.clone(),
                _ => "unknown error".to_owned(),
            },
        );
        let request = message.request;

        let mut state = self.state.write().await;
        let joined = match &mut *state {
            SessionState::Joined(joined) => joined,
            _ => return,
        };
        match message.request_type {
            Message::SUBSCRIBE_TAG => match joined.pending_subscriptions.remove(&request) {
                Some(event_tx) => {
                    drop(state);
                    self.id_allocator.release_id(request).await;
                    event_tx.send(SubscriptionEvent::Failed(error)).ok();
                }
                None => {
                    drop(state);
                    self.abort_for_protocol_violation(format!(
                        "Received ERROR for SUBSCRIBE that we have no pending subscription for. RequestId = {request}"
                    ))
                    .await;
                }
            },
            Message::UNSUBSCRIBE_TAG => match joined.pending_unsubscriptions.remove(&request) {
                Some((_, event_tx)) => {
                    drop(state);
                    self.id_allocator.release_id(request).await;
                    event_tx
                        .send(SubscriptionEvent::UnsubscribeFailed(error))
                        .ok();
                }
                None => {
                    drop(state);
                    self.abort_for_protocol_violation(format!(
                        "Received ERROR for UNSUBSCRIBE that we have no pending unsubscription for. RequestId = {request}"
                    ))
                    .await;
                }
            },
            Message::PUBLISH_TAG => match joined.pending_publications.remove(&request) {
                Some(event_tx) => {
                    drop(state);
                    self.id_allocator.release_id(request).await;
                    event_tx.send(PublicationEvent::Failed(error)).ok();
                }
                None => {
                    drop(state);
                    self.abort_for_protocol_violation(format!(
                        "Received ERROR for PUBLISH that we have no pending publication for. RequestId = {request}"
                    ))
                    .await;
                }
            },
            Message::REGISTER_TAG => match joined.pending_registrations.remove(&request) {
                Some(event_tx) => {
                    drop(state);
                    self.id_allocator.release_id(request).await;
                    event_tx.send(ProcedureEvent::Failed(error)).ok();
                }
                None => {
                    drop(state);
                    self.abort_for_protocol_violation(format!(
                        "Received ERROR for REGISTER that we have no pending registration for. RequestId = {request}"
                    ))
                    .await;
                }
            },
            Message::UNREGISTER_TAG => match joined.pending_unregistrations.remove(&request) {
                Some((_, event_tx)) => {
                    drop(state);
                    self.id_allocator.release_id(request).await;
                    event_tx.send(ProcedureEvent::UnregisterFailed(error)).ok();
                }
                None => {
                    drop(state);
                    self.abort_for_protocol_violation(format!(
                        "Received ERROR for UNREGISTER that we have no pending unregistration for. RequestId = {request}"
                    ))
                    .await;
                }
            },
            Message::CALL_TAG => match joined.pending_calls.remove(&request) {
                Some(event_tx) => {
                    drop(state);
                    self.id_allocator.release_id(request).await;
                    event_tx
                        .send(CallEvent::Failed(RpcError {
                            error,
                            arguments: message.arguments,
                            arguments_keyword: message.arguments_keyword,
                        }))
                        .ok();
                }
                None => {
                    drop(state);
                    self.abort_for_protocol_violation(format!(
                        "Received ERROR for CALL that we have no pending call for. RequestId = {request}"
                    ))
                    .await;
                }
            },
            Message::INVOCATION_TAG => {
                // Callees send INVOCATION errors; they never receive them. There is no pending
                // table to correlate against, so the message carries no actionable state.
                drop(state);
                warn!(
                    "Peer {} ignoring ERROR for INVOCATION with request ID {request}",
                    self.name
                );
            }
            request_type => {
                drop(state);
                self.abort_for_protocol_violation(format!(
                    "Received ERROR with unrecognized request type {request_type}"
                ))
                .await;
            }
        }
    }

    async fn handle_subscribed(&self, message: SubscribedMessage) {
        let mut state = self.state.write().await;
        let joined = match &mut *state {
            SessionState::Joined(joined) => joined,
            _ => return,
        };
        match joined.pending_subscriptions.remove(&message.subscribe_request) {
            Some(event_tx) => {
                joined
                    .subscriptions
                    .insert(message.subscription, event_tx.clone());
                drop(state);
                self.id_allocator.release_id(message.subscribe_request).await;
                event_tx
                    .send(SubscriptionEvent::Established {
                        subscription: message.subscription,
                    })
                    .ok();
            }
            None => {
                drop(state);
                self.abort_for_protocol_violation(format!(
                    "Received SUBSCRIBED that we have no pending subscription for. RequestId = {} subscriptionId = {}",
                    message.subscribe_request, message.subscription
                ))
                .await;
            }
        }
    }

    async fn handle_unsubscribed(&self, message: UnsubscribedMessage) {
        let mut state = self.state.write().await;
        let joined = match &mut *state {
            SessionState::Joined(joined) => joined,
            _ => return,
        };
        match joined
            .pending_unsubscriptions
            .remove(&message.unsubscribe_request)
        {
            Some((_, event_tx)) => {
                drop(state);
                self.id_allocator
                    .release_id(message.unsubscribe_request)
                    .await;
                event_tx.send(SubscriptionEvent::Closed).ok();
            }
            None => {
                drop(state);
                self.abort_for_protocol_violation(format!(
                    "Received UNSUBSCRIBED that we have no pending unsubscription for. RequestId = {}",
                    message.unsubscribe_request
                ))
                .await;
            }
        }
    }

    async fn handle_event(&self, message: EventMessage) {
        let state = self.state.read().await;
        let joined = match &*state {
            SessionState::Joined(joined) => joined,
            _ => return,
        };
        if let Some(event_tx) = joined.subscriptions.get(&message.subscribed_subscription) {
            event_tx
                .send(SubscriptionEvent::Event(ReceivedEvent {
                    arguments: message.publish_arguments,
                    arguments_keyword: message.publish_arguments_keyword,
                }))
                .ok();
        } else if joined
            .pending_unsubscriptions
            .values()
            .any(|(subscription, _)| *subscription == message.subscribed_subscription)
        {
            // The event raced our unsubscribe request. Drop it.
        } else {
            drop(state);
            self.abort_for_protocol_violation(format!(
                "Received EVENT for a subscription we do not have. SubscriptionId = {}",
                message.subscribed_subscription
            ))
            .await;
        }
    }

    async fn handle_published(&self, message: PublishedMessage) {
        let mut state = self.state.write().await;
        let joined = match &mut *state {
            SessionState::Joined(joined) => joined,
            _ => return,
        };
        match joined.pending_publications.remove(&message.publish_request) {
            Some(event_tx) => {
                drop(state);
                self.id_allocator.release_id(message.publish_request).await;
                event_tx
                    .send(PublicationEvent::Published {
                        publication: message.publication,
                    })
                    .ok();
            }
            None => {
                drop(state);
                self.abort_for_protocol_violation(format!(
                    "Received PUBLISHED that we have no pending publication for. RequestId = {}",
                    message.publish_request
                ))
                .await;
            }
        }
    }

    async fn handle_registered(&self, message: RegisteredMessage) {
        let mut state = self.state.write().await;
        let joined = match &mut *state {
            SessionState::Joined(joined) => joined,
            _ => return,
        };
        match joined.pending_registrations.remove(&message.register_request) {
            Some(event_tx) => {
                joined
                    .registrations
                    .insert(message.registration, event_tx.clone());
                drop(state);
                self.id_allocator.release_id(message.register_request).await;
                event_tx
                    .send(ProcedureEvent::Registered {
                        registration: message.registration,
                    })
                    .ok();
            }
            None => {
                drop(state);
                self.abort_for_protocol_violation(format!(
                    "Received REGISTERED that we have no pending registration for. RequestId = {} registrationId = {}",
                    message.register_request, message.registration
                ))
                .await;
            }
        }
    }

    async fn handle_unregistered(&self, message: UnregisteredMessage) {
        let mut state = self.state.write().await;
        let joined = match &mut *state {
            SessionState::Joined(joined) => joined,
            _ => return,
        };
        match joined
            .pending_unregistrations
            .remove(&message.unregister_request)
        {
            Some((_, event_tx)) => {
                drop(state);
                self.id_allocator
                    .release_id(message.unregister_request)
                    .await;
                event_tx.send(ProcedureEvent::Unregistered).ok();
            }
            None => {
                drop(state);
                self.abort_for_protocol_violation(format!(
                    "Received UNREGISTERED that we have no pending unregistration for. RequestId = {}",
                    message.unregister_request
                ))
                .await;
            }
        }
    }

    async fn handle_invocation(&self, message: InvocationMessage) {
        let state = self.state.read().await;
        let joined = match &*state {
            SessionState::Joined(joined) => joined,
            _ => return,
        };
        if let Some(event_tx) = joined.registrations.get(&message.registered_registration) {
            event_tx
                .send(ProcedureEvent::Invocation(Invocation {
                    arguments: message.call_arguments,
                    arguments_keyword: message.call_arguments_keyword,
                    request_id: message.request,
                    trigger_tx: self.trigger_tx.clone(),
                }))
                .ok();
        } else if joined
            .pending_unregistrations
            .values()
            .any(|(registration, _)| *registration == message.registered_registration)
        {
            // The invocation raced our unregister request. Drop it.
        } else {
            drop(state);
            self.abort_for_protocol_violation(format!(
                "Received INVOCATION for a registration we do not have. RegistrationId = {}",
                message.registered_registration
            ))
            .await;
        }
    }

    async fn handle_result(&self, message: ResultMessage) {
        let mut state = self.state.write().await;
        let joined = match &mut *state {
            SessionState::Joined(joined) => joined,
            _ => return,
        };
        match joined.pending_calls.remove(&message.call_request) {
            Some(event_tx) => {
                drop(state);
                self.id_allocator.release_id(message.call_request).await;
                event_tx
                    .send(CallEvent::Result(RpcResult {
                        arguments: message.yield_arguments,
                        arguments_keyword: message.yield_arguments_keyword,
                    }))
                    .ok();
            }
            None => {
                drop(state);
                self.abort_for_protocol_violation(format!(
                    "Received RESULT that we have no pending call for. RequestId = {}",
                    message.call_request
                ))
                .await;
            }
        }
    }

    async fn handle_message_while_leaving(&self, message: Message) {
        match message {
            Message::Goodbye(_) => {
                let realm = {
                    let mut state = self.state.write().await;
                    let realm = match &*state {
                        SessionState::Leaving(leaving) => leaving.realm.clone(),
                        _ => return,
                    };
                    *state = SessionState::Initial;
                    realm
                };
                info!("Peer {} left realm {realm}", self.name);
                self.notify(SessionEvent::RealmLeft {
                    realm,
                    initiated_by_router: false,
                });
            }
            // Messages racing our GOODBYE are expected and carry no state we still track.
            _ => debug!(
                "Peer {} ignored {} message while leaving",
                self.name,
                message.message_name()
            ),
        }
    }

    async fn handle_message_while_shutting_down(&self, message: Message) {
        match message {
            Message::Goodbye(_) => {
                let realm = {
                    let mut state = self.state.write().await;
                    let realm = match &*state {
                        SessionState::ShuttingDown(shutting_down) => {
                            shutting_down.realm.clone()
                        }
                        _ => return,
                    };
                    *state = SessionState::ShutDown;
                    realm
                };
                info!("Peer {} left realm {realm} and shut down", self.name);
                self.notify(SessionEvent::RealmLeft {
                    realm,
                    initiated_by_router: false,
                });
                self.send_close(CloseCode::Normal);
                self.notify(SessionEvent::Shutdown);
            }
            _ => debug!(
                "Peer {} ignored {} message while shutting down",
                self.name,
                message.message_name()
            ),
        }
    }

    async fn handle_invalid_message(&self, invalid: InvalidMessage) {
        if matches!(*self.state.read().await, SessionState::Aborted) {
            return;
        }
        self.abort_for_protocol_violation(format!("received invalid message: {invalid}"))
            .await;
    }

    async fn handle_binary_message(&self) {
        if matches!(*self.state.read().await, SessionState::Aborted) {
            return;
        }
        self.abort_for_protocol_violation(
            "received binary message over a text-only transport".to_owned(),
        )
        .await;
    }

    async fn handle_transport_closed(&self, code: Option<u16>, reason: String) {
        if matches!(
            *self.state.read().await,
            SessionState::ShutDown | SessionState::Aborted
        ) {
            return;
        }
        let detail = match code {
            Some(code) if !reason.is_empty() => format!("connection closed ({code}: {reason})"),
            Some(code) => format!("connection closed ({code})"),
            None => "connection closed".to_owned(),
        };
        self.abort(
            WampError::from(&Error::from(InteractionError::NetworkFailure(detail))),
            AbortSource::Transport,
        )
        .await;
    }

    async fn handle_transport_failed(&self, error: String) {
        if matches!(
            *self.state.read().await,
            SessionState::ShutDown | SessionState::Aborted
        ) {
            return;
        }
        self.abort(
            WampError::from(&Error::from(InteractionError::NetworkFailure(error))),
            AbortSource::Transport,
        )
        .await;
    }

    fn misuse_error(&self, message: String) -> WampError {
        WampError::from(&Error::from(InteractionError::ProtocolViolation(message)))
    }

    async fn abort_for_protocol_violation(&self, message: String) {
        let error = Error::from(InteractionError::ProtocolViolation(message));
        self.abort_with_error(error, AbortSource::ProtocolViolation)
            .await;
    }

    async fn abort_for_misuse(&self, message: String) {
        let error = Error::from(InteractionError::ProtocolViolation(message));
        self.abort_with_error(error, AbortSource::LocalMisuse).await;
    }

    async fn abort_for_cancellation(&self, message: &str) {
        let error = Error::from(InteractionError::Canceled).context(message.to_owned());
        self.abort_with_error(error, AbortSource::LocalMisuse).await;
    }

    async fn abort_with_error(&self, error: Error, source: AbortSource) {
        if matches!(*self.state.read().await, SessionState::Aborted) {
            return;
        }
        let wamp_error = WampError::new(Uri::for_error(&error), error.to_string());
        if source != AbortSource::Router && source != AbortSource::Transport {
            self.send_message(abort_message_for_error(&error));
        }
        self.abort(wamp_error, source).await;
    }

    async fn abort(&self, error: WampError, source: AbortSource) {
        let prev = {
            let mut state = self.state.write().await;
            if matches!(*state, SessionState::Aborted) {
                return;
            }
            std::mem::replace(&mut *state, SessionState::Aborted)
        };
        warn!(
            "Peer {} aborted from {}: {error}",
            self.name,
            prev.name()
        );
        if let SessionState::Joined(joined) = prev {
            self.drain_for_abort(joined, &error);
        }
        self.id_allocator.reset().await;
        match source {
            AbortSource::ProtocolViolation => self.send_close(CloseCode::ProtocolError),
            AbortSource::LocalMisuse | AbortSource::Router => self.send_close(CloseCode::Normal),
            AbortSource::Transport => (),
        }
        self.notify(SessionEvent::Aborted(error));
    }

    /// Empties every registry after the session leaves the realm cleanly.
    ///
    /// Live subscriptions and registrations close as if they were taken down explicitly;
    /// requests still awaiting a response fail with the close reason.
    async fn drain_for_close(&self, joined: JoinedState, reason: CloseReason) {
        let error = WampError::new(reason.uri(), "session closed");
        self.drain_graceful(joined, &error);
        self.id_allocator.reset().await;
    }

    async fn drain_for_goodbye(&self, joined: JoinedState, reason: &Uri) {
        let error = WampError::new(reason.clone(), "session closed by router");
        self.drain_graceful(joined, &error);
        self.id_allocator.reset().await;
    }

    fn drain_graceful(&self, joined: JoinedState, error: &WampError) {
        for (_, event_tx) in joined.pending_subscriptions {
            event_tx.send(SubscriptionEvent::Failed(error.clone())).ok();
        }
        for (_, event_tx) in joined.subscriptions {
            event_tx.send(SubscriptionEvent::Closed).ok();
        }
        for (_, (_, event_tx)) in joined.pending_unsubscriptions {
            event_tx.send(SubscriptionEvent::Closed).ok();
        }
        for (_, event_tx) in joined.pending_registrations {
            event_tx.send(ProcedureEvent::Failed(error.clone())).ok();
        }
        for (_, event_tx) in joined.registrations {
            event_tx.send(ProcedureEvent::Unregistered).ok();
        }
        for (_, (_, event_tx)) in joined.pending_unregistrations {
            event_tx.send(ProcedureEvent::Unregistered).ok();
        }
        for (_, event_tx) in joined.pending_calls {
            event_tx
                .send(CallEvent::Failed(RpcError::new(error.clone())))
                .ok();
        }
        for (_, event_tx) in joined.pending_publications {
            event_tx.send(PublicationEvent::Failed(error.clone())).ok();
        }
    }

    fn drain_for_abort(&self, joined: JoinedState, error: &WampError) {
        for (_, event_tx) in joined.pending_subscriptions {
            event_tx.send(SubscriptionEvent::Failed(error.clone())).ok();
        }
        for (_, event_tx) in joined.subscriptions {
            event_tx.send(SubscriptionEvent::Failed(error.clone())).ok();
        }
        for (_, (_, event_tx)) in joined.pending_unsubscriptions {
            event_tx
                .send(SubscriptionEvent::UnsubscribeFailed(error.clone()))
                .ok();
        }
        for (_, event_tx) in joined.pending_registrations {
            event_tx.send(ProcedureEvent::Failed(error.clone())).ok();
        }
        for (_, event_tx) in joined.registrations {
            event_tx.send(ProcedureEvent::Failed(error.clone())).ok();
        }
        for (_, (_, event_tx)) in joined.pending_unregistrations {
            event_tx
                .send(ProcedureEvent::UnregisterFailed(error.clone()))
                .ok();
        }
        for (_, event_tx) in joined.pending_calls {
            event_tx
                .send(CallEvent::Failed(RpcError::new(error.clone())))
                .ok();
        }
        for (_, event_tx) in joined.pending_publications {
            event_tx.send(PublicationEvent::Failed(error.clone())).ok();
        }
    }

    async fn exit_joined(&self, next: SessionState) -> Option<JoinedState> {
        let mut state = self.state.write().await;
        if !matches!(&*state, SessionState::Joined(_)) {
            return None;
        }
        match std::mem::replace(&mut *state, next) {
            SessionState::Joined(joined) => Some(joined),
            _ => None,
        }
    }
}
