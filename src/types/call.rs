//! Core call identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a remote party.
///
/// The surrounding app addresses peers by account id; the coordinator never
/// inspects the contents, it only keys sessions and ledger entries by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport-level call identifier.
///
/// Incoming attempts may live for a while without one: the wake path and the
/// handoff store deliver call intent before the first signaling message has
/// landed. The session adopts the id from the first message that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id for an outgoing call (32 uppercase hex chars).
    pub fn generate() -> Self {
        use rand::RngCore;
        use std::fmt::Write;
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let mut id = String::with_capacity(32);
        for b in bytes {
            write!(id, "{b:02X}").expect("writing to a String cannot fail");
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

impl CallDirection {
    pub fn role(self) -> CallRole {
        match self {
            CallDirection::Outgoing => CallRole::Caller,
            CallDirection::Incoming => CallRole::Receiver,
        }
    }
}

/// Which side of the call we are on. Derived from the direction; handed to
/// the media collaborator when signaling starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallRole {
    Caller,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CallMediaType {
    #[default]
    Audio,
    Video,
}

/// Why a call attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndCallReason {
    /// The local user hung up or canceled.
    UserEnded,
    /// The local user declined an incoming call.
    Declined,
    /// The remote side declined our call.
    RemoteDeclined,
    /// The remote side canceled or hung up.
    RemoteEnded,
    /// Nobody answered within the ring window.
    RingTimeout,
    /// The wake path answered but the signaling payload never arrived.
    SignalTimeout,
    /// Media never connected within the failsafe window.
    ConnectFailed,
    /// An established connection dropped.
    ConnectionLost,
    /// The peer is in another call.
    Busy,
    /// The peer is unreachable.
    Offline,
}

impl EndCallReason {
    /// True for reasons the UI should surface as a specific message rather
    /// than a generic "call failed".
    pub fn is_user_visible(self) -> bool {
        !matches!(self, EndCallReason::UserEnded)
    }
}

/// Identity of one in-progress call attempt with a peer.
///
/// Keyed by peer and direction rather than a random uuid: duplicate wake
/// deliveries describing the same logical call must collapse onto the same
/// fingerprint before both ends have agreed on a shared call id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallFingerprint {
    pub peer: PeerId,
    pub direction: CallDirection,
}

impl CallFingerprint {
    pub fn new(peer: PeerId, direction: CallDirection) -> Self {
        Self { peer, direction }
    }

    pub fn outgoing(peer: PeerId) -> Self {
        Self::new(peer, CallDirection::Outgoing)
    }

    pub fn incoming(peer: PeerId) -> Self {
        Self::new(peer, CallDirection::Incoming)
    }
}

impl fmt::Display for CallFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            CallDirection::Outgoing => "out",
            CallDirection::Incoming => "in",
        };
        write!(f, "{}/{}", self.peer, dir)
    }
}
