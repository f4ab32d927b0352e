use crate::core::uri::Uri;

/// The reason for closing a WAMP session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer is leaving the realm.
    #[default]
    CloseRealm,
    /// The peer is shutting down completely.
    SystemShutdown,
    /// Acknowledgement of a GOODBYE received from the other side.
    GoodbyeAndOut,
}

impl CloseReason {
    fn uri_component(&self) -> &str {
        match self {
            Self::CloseRealm => "close_realm",
            Self::SystemShutdown => "system_shutdown",
            Self::GoodbyeAndOut => "goodbye_and_out",
        }
    }

    /// URI for the close reason.
    pub fn uri(&self) -> Uri {
        Uri::from_known(format!("wamp.close.{}", self.uri_component()))
    }

    /// Looks up the close reason named by a URI.
    pub fn from_uri(uri: &Uri) -> Option<CloseReason> {
        match uri.as_ref() {
            "wamp.close.close_realm" => Some(Self::CloseRealm),
            "wamp.close.system_shutdown" => Some(Self::SystemShutdown),
            "wamp.close.goodbye_and_out" => Some(Self::GoodbyeAndOut),
            _ => None,
        }
    }
}

/// A WebSocket close code sent when the session closes the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Benign close (leave, shutdown, local abort).
    Normal,
    /// The other side violated the WAMP protocol.
    ProtocolError,
}

impl CloseCode {
    /// The numeric WebSocket close code.
    pub fn code(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::ProtocolError => 1002,
        }
    }
}

#[cfg(test)]
mod close_test {
    use crate::core::close::{
        CloseCode,
        CloseReason,
    };

    #[test]
    fn close_reasons_round_trip_through_uris() {
        for reason in [
            CloseReason::CloseRealm,
            CloseReason::SystemShutdown,
            CloseReason::GoodbyeAndOut,
        ] {
            assert_eq!(CloseReason::from_uri(&reason.uri()), Some(reason));
        }
        assert_eq!(
            CloseReason::SystemShutdown.uri().as_ref(),
            "wamp.close.system_shutdown"
        );
    }

    #[test]
    fn close_codes_match_the_websocket_registry() {
        assert_eq!(CloseCode::Normal.code(), 1000);
        assert_eq!(CloseCode::ProtocolError.code(), 1002);
    }
}
