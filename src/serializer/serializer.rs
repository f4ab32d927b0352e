use anyhow::Result;
use thiserror::Error;

use crate::{
    core::uri::Uri,
    message::message::Message,
    serializer::json::JsonSerializer,
};

/// The type of serializer to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SerializerType {
    /// Serializes messages to and from JavaScript Object Notation.
    Json,
}

impl SerializerType {
    /// The protocol URI used during protocol negotiation.
    pub fn uri(&self) -> Uri {
        match self {
            Self::Json => Uri::from_known("wamp.2.json"),
        }
    }
}

impl TryFrom<&str> for SerializerType {
    type Error = &'static str;
    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value {
            "wamp.2.json" => Ok(Self::Json),
            _ => Err("unsupported serializer"),
        }
    }
}

/// How a frame failed to decode into a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidMessageKind {
    /// The frame is not a JSON array shaped like a WAMP message.
    #[error("malformed message")]
    Malformed,
    /// The frame is a message array, but its type code is not part of the grammar.
    #[error("unknown message type")]
    UnknownType,
}

/// A frame that could not be decoded into a [`Message`].
///
/// Carries the original frame text for diagnostics. Invalid messages are values produced by
/// decoding only; they can never be encoded back onto the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {text}")]
pub struct InvalidMessage {
    pub kind: InvalidMessageKind,
    pub text: String,
}

impl InvalidMessage {
    pub fn malformed<S>(text: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            kind: InvalidMessageKind::Malformed,
            text: text.into(),
        }
    }

    pub fn unknown_type<S>(text: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            kind: InvalidMessageKind::UnknownType,
            text: text.into(),
        }
    }
}

/// A serializer, which serializes and deserializes WAMP messages to a well-known text format
/// that can be passed over wire.
///
/// Does not implement message batching.
pub trait Serializer: Send {
    /// Serializes the given message to frame text.
    fn serialize(&self, value: &Message) -> Result<String>;

    /// Deserializes frame text to a message.
    fn deserialize(&self, text: &str) -> Result<Message, InvalidMessage>;
}

/// Creates a new [`Serializer`] for the given type.
pub fn new_serializer(serializer_type: SerializerType) -> Box<dyn Serializer> {
    match serializer_type {
        SerializerType::Json => Box::new(JsonSerializer::default()),
    }
}
