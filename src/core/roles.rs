/// A role a peer can implement within a realm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    // Publishes events to topics.
    Publisher,
    // Subscribes to events for topics.
    Subscriber,
    // Calls RPC endpoints.
    Caller,
    // Registers RPC endpoints.
    Callee,
}

impl PeerRole {
    /// All peer roles, in the order they are advertised in HELLO details.
    pub const ALL: [PeerRole; 4] = [
        PeerRole::Publisher,
        PeerRole::Subscriber,
        PeerRole::Caller,
        PeerRole::Callee,
    ];

    pub fn key_for_details(&self) -> &str {
        match self {
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
            Self::Caller => "caller",
            Self::Callee => "callee",
        }
    }
}
