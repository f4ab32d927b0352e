//! # wamp-peer
//!
//! **wamp-peer** is a client-side implementation of the **Web Application Messaging Protocol**
//! (WAMP) v2 for Rust.
//!
//! The library implements the peer (a.k.a., client) half of the protocol: it connects to a WAMP
//! router over a WebSocket stream speaking the `wamp.2.json` subprotocol, establishes sessions
//! in a realm, and unifies the two WAMP messaging patterns over that one connection:
//!
//! * **Publish & Subscribe**: subscribe to topics and publish events to them.
//! * **Routed Remote Procedure Calls**: register procedures and call procedures registered by
//!   other peers.
//!
//! The library uses [`tokio`](https://tokio.rs) as its asynchronous runtime.
//!
//! ## What is WAMP?
//!
//! **WAMP** is an open standard, routed protocol that provides two messaging patterns: Publish &
//! Subscribe and routed Remote Procedure Calls. It is intended to connect application components
//! in distributed applications. WAMP uses WebSocket as its default transport, but it can be
//! transmitted via any other protocol that allows for ordered, reliable, bi-directional, and
//! message-oriented communications.
//!
//! The WAMP protocol specification is described [here](https://wamp-proto.org/spec.html).
//!
//! ## Sessions
//!
//! Configure a peer using a [`PeerConfig`][`crate::peer::PeerConfig`] and construct a
//! [`Peer`][`crate::peer::Peer`] directly. If you are working with WebSocket connections, the
//! [`new_web_socket_peer`][`crate::peer::new_web_socket_peer`] utility function sets up the
//! proper modules for convenience.
//!
//! A peer is driven by a session state machine running in a background task. Application
//! operations and router messages feed the same serialized evaluator, so every state transition
//! and every request/response correlation is processed in a single place, one input at a time.
//!
//! Session-wide lifecycle changes (realm joined, realm left, shutdown, abort) are delivered on
//! the channel returned by [`Peer::session_event_rx`][`crate::peer::Peer::session_event_rx`].
//! Each individual operation (a subscription, a registration, a call, an acknowledged
//! publication) hands back its own event channel, which emits that operation's lifecycle and
//! closes right after a terminal event.
//!
//! ## Example
//!
//! ```no_run
//! use anyhow::Result;
//! use wamp_peer::{
//!     core::uri::Uri,
//!     peer::{
//!         new_web_socket_peer,
//!         CallEvent,
//!         PeerConfig,
//!         RpcCall,
//!         SubscriptionEvent,
//!     },
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let peer = new_web_socket_peer(PeerConfig::default())?;
//!     peer.connect("ws://localhost:8080").await?;
//!     peer.join_realm("com.myapp.realm").await?;
//!
//!     // Subscribe to a topic. The first event on the channel reports the subscription ID;
//!     // every published event follows.
//!     let mut subscription = peer
//!         .subscribe(Uri::try_from("com.myapp.mytopic1")?)
//!         .await?;
//!     while let Some(event) = subscription.recv().await {
//!         match event {
//!             SubscriptionEvent::Established { subscription } => {
//!                 println!("subscribed with ID {subscription}");
//!             }
//!             SubscriptionEvent::Event(event) => println!("received {event:?}"),
//!             _ => break,
//!         }
//!     }
//!
//!     // Call a procedure. The channel emits exactly one terminal event.
//!     let mut call = peer
//!         .call(Uri::try_from("com.myapp.echo")?, RpcCall::default())
//!         .await?;
//!     match call.recv().await {
//!         Some(CallEvent::Result(result)) => println!("result: {result:?}"),
//!         Some(CallEvent::Failed(error)) => println!("call failed: {error:?}"),
//!         None => (),
//!     }
//!
//!     peer.shutdown().await?;
//!     Ok(())
//! }
//! ```
pub mod core;
pub mod message;
pub mod peer;
pub mod serializer;
pub mod transport;
