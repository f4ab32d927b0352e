pub mod connector;
mod peer;
mod session;
mod web_socket_peer;

pub use peer::{
    Peer,
    PeerConfig,
    WebSocketConfig,
};
pub use session::{
    CallEvent,
    Invocation,
    ProcedureEvent,
    PublicationEvent,
    PublishedEvent,
    ReceivedEvent,
    RpcCall,
    RpcError,
    RpcResult,
    RpcYield,
    SessionEvent,
    SessionHandle,
    SubscriptionEvent,
};
pub use web_socket_peer::{
    new_web_socket_peer,
    WebSocketPeer,
};
