use anyhow::{
    Error,
    Result,
};

use crate::{
    message::message::Message,
    serializer::serializer::{
        InvalidMessage,
        Serializer,
    },
};

/// A serializer implemented for JavaScript Object Notation.
#[derive(Debug, Default)]
pub struct JsonSerializer {}

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Message) -> Result<String> {
        serde_json::to_string(value).map_err(Error::new)
    }

    fn deserialize(&self, text: &str) -> Result<Message, InvalidMessage> {
        let document = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(document) => document,
            Err(_) => return Err(InvalidMessage::malformed(text)),
        };
        let tag = match document
            .as_array()
            .and_then(|elements| elements.first())
            .and_then(|tag| tag.as_u64())
        {
            Some(tag) => tag,
            None => return Err(InvalidMessage::malformed(text)),
        };
        if !Message::is_known_tag(tag) {
            return Err(InvalidMessage::unknown_type(text));
        }
        serde_json::from_value(document).map_err(|_| InvalidMessage::malformed(text))
    }
}

#[cfg(test)]
mod json_serializer_test {
    use crate::{
        core::{
            id::Id,
            types::Dictionary,
            uri::Uri,
        },
        message::message::{
            HelloMessage,
            Message,
            SubscribedMessage,
        },
        serializer::{
            json::JsonSerializer,
            serializer::{
                InvalidMessageKind,
                Serializer,
            },
        },
    };

    #[test]
    fn serializes_compact_json() {
        let serializer = JsonSerializer::default();
        assert_matches::assert_matches!(
            serializer.serialize(&Message::Hello(HelloMessage {
                realm: Uri::try_from("somerealm").unwrap(),
                details: Dictionary::default(),
            })),
            Ok(text) => assert_eq!(text, r#"[1,"somerealm",{}]"#)
        );
    }

    #[test]
    fn deserializes_known_messages() {
        let serializer = JsonSerializer::default();
        assert_matches::assert_matches!(
            serializer.deserialize("[33,713845233,5512315355]"),
            Ok(Message::Subscribed(message)) => {
                assert_eq!(message, SubscribedMessage {
                    subscribe_request: Id::try_from(713845233).unwrap(),
                    subscription: Id::try_from(5512315355).unwrap(),
                });
            }
        );
    }

    #[test]
    fn rejects_frames_that_are_not_message_arrays() {
        let serializer = JsonSerializer::default();
        for text in [
            "not json",
            "{}",
            r#"{"type":1}"#,
            "[]",
            r#"["HELLO","somerealm"]"#,
            "[1.5]",
            "[-1]",
        ] {
            assert_matches::assert_matches!(
                serializer.deserialize(text),
                Err(invalid) => {
                    assert_eq!(invalid.kind, InvalidMessageKind::Malformed);
                    assert_eq!(invalid.text, text);
                }
            );
        }
    }

    #[test]
    fn rejects_unknown_message_types() {
        let serializer = JsonSerializer::default();
        assert_matches::assert_matches!(
            serializer.deserialize(r#"[99,"somerealm",{}]"#),
            Err(invalid) => {
                assert_eq!(invalid.kind, InvalidMessageKind::UnknownType);
                assert_eq!(invalid.text, r#"[99,"somerealm",{}]"#);
            }
        );
    }

    #[test]
    fn rejects_structurally_invalid_known_messages() {
        let serializer = JsonSerializer::default();
        // SUBSCRIBED with a missing subscription ID.
        assert_matches::assert_matches!(
            serializer.deserialize("[33,713845233]"),
            Err(invalid) => assert_eq!(invalid.kind, InvalidMessageKind::Malformed)
        );
        // Request ID out of range.
        assert_matches::assert_matches!(
            serializer.deserialize("[33,0,5512315355]"),
            Err(invalid) => assert_eq!(invalid.kind, InvalidMessageKind::Malformed)
        );
    }
}
