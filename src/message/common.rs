use anyhow::Error;

use crate::{
    core::{
        close::CloseReason,
        error::WampError,
        id::Id,
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        AbortMessage,
        ErrorMessage,
        GoodbyeMessage,
        Message,
    },
};

pub fn abort_message_for_error(error: &Error) -> Message {
    Message::Abort(AbortMessage {
        details: Dictionary::from_iter([("message".to_owned(), Value::String(error.to_string()))]),
        reason: Uri::for_error(error),
    })
}

pub fn goodbye_with_close_reason(close_reason: CloseReason) -> Message {
    Message::Goodbye(GoodbyeMessage {
        details: Dictionary::default(),
        reason: close_reason.uri(),
    })
}

pub fn goodbye_and_out() -> Message {
    goodbye_with_close_reason(CloseReason::GoodbyeAndOut)
}

/// An ERROR message sent by a callee that failed to service an INVOCATION.
pub fn error_for_invocation(
    request: Id,
    error: &WampError,
    arguments: List,
    arguments_keyword: Dictionary,
) -> Message {
    Message::Error(ErrorMessage {
        request_type: Message::INVOCATION_TAG,
        request,
        details: Dictionary::from_iter([(
            "message".to_owned(),
            Value::String(error.message().to_owned()),
        )]),
        error: error.reason().clone(),
        arguments,
        arguments_keyword,
    })
}
