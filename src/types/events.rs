//! Normalized events and the in-process event bus.
//!
//! Every platform channel (signaling transport, OS wake path, handoff store,
//! local bus) is wrapped by an adapter that emits the single [`RawEvent`]
//! shape into the coordinator queue. UI surfaces consume [`CallEvent`]s
//! fanned out on the [`EventBus`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};

use super::call::{CallId, CallMediaType, EndCallReason, PeerId};

/// Which channel produced an event. Carried for logging and diagnostics;
/// the coordinator's correctness rules never branch on it alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventSource {
    Transport,
    Wake,
    Handoff,
    LocalBus,
    Timer,
    Local,
}

/// Media connection state reported by the media collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BusyReason {
    Busy,
    Offline,
}

/// The normalized event kinds the coordinator ingests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EventKind {
    /// A call invite landed (transport message, wake delivery, or a
    /// handoff record surviving a process restart).
    InviteReceived {
        peer_name: String,
        media_kind: CallMediaType,
    },
    /// Local user started an outgoing call.
    OutgoingCallIntent { media_kind: CallMediaType },
    /// Local user tapped Answer in the live call UI.
    AnswerIntent,
    /// The human already tapped Answer on the wake-path (full-screen
    /// native) UI, possibly before the process finished starting.
    WakeAnswerIntent,
    /// Local user declined an incoming call.
    DeclineIntent,
    /// Cancel/hangup: local user canceling or hanging up, or the remote
    /// side's cancel arriving over the transport.
    CancelIntent,
    /// A remote description (offer/answer payload) arrived.
    RemoteSignal,
    /// A remote ICE candidate arrived.
    RemoteCandidate,
    /// The transport acknowledged our outbound accept.
    TransportAck,
    /// The media collaborator's connection state changed.
    ConnectionStateChanged(ConnState),
    /// The peer is busy or offline.
    BusyOrOffline(BusyReason),
    /// Ring window elapsed without an answer.
    RingTimeoutElapsed,
    /// Connect failsafe elapsed without media coming up.
    ConnectFailsafeElapsed,
    /// One tick of the bounded wait for a wake-path signal payload.
    WakeSignalPoll,
}

impl EventKind {
    /// Kinds that may mint a new session when none is live for the peer.
    pub fn can_originate(&self) -> bool {
        matches!(
            self,
            EventKind::InviteReceived { .. } | EventKind::OutgoingCallIntent { .. }
        )
    }

    /// Kinds still admitted once a decline/cancel guard is set. Everything
    /// else is progress-making and gets discarded behind the guard.
    pub fn allowed_behind_guard(&self) -> bool {
        match self {
            EventKind::DeclineIntent
            | EventKind::CancelIntent
            | EventKind::BusyOrOffline(_)
            | EventKind::RingTimeoutElapsed
            | EventKind::ConnectFailsafeElapsed => true,
            EventKind::ConnectionStateChanged(state) => {
                matches!(state, ConnState::Disconnected | ConnState::Failed)
            }
            _ => false,
        }
    }
}

/// The uniform event shape adapters enqueue.
#[derive(Debug, Clone, Serialize)]
pub struct RawEvent {
    pub kind: EventKind,
    pub peer: PeerId,
    pub call_id: Option<CallId>,
    /// Opaque payload (remote description, candidate) when the kind
    /// carries one.
    #[serde(skip)]
    pub payload: Option<Bytes>,
    /// When the source originally emitted this event. Re-deliveries of the
    /// same physical event carry the original timestamp, which is what
    /// lets the fencing ledger tell a duplicate from a genuinely new
    /// attempt.
    pub source_ts: DateTime<Utc>,
    pub source: EventSource,
}

impl RawEvent {
    pub fn new(kind: EventKind, peer: PeerId, source: EventSource) -> Self {
        Self {
            kind,
            peer,
            call_id: None,
            payload: None,
            source_ts: Utc::now(),
            source,
        }
    }

    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_source_ts(mut self, ts: DateTime<Utc>) -> Self {
        self.source_ts = ts;
        self
    }
}

/// UI-facing events fanned out on the bus once the coordinator has made a
/// decision. These are the only things presentation surfaces subscribe to.
#[derive(Debug, Clone, Serialize)]
pub enum CallEvent {
    IncomingCall {
        peer: PeerId,
        peer_name: String,
        media_kind: CallMediaType,
        /// True when the wake path already answered; the UI should show a
        /// connecting surface instead of answer/decline controls.
        answered_via_wake: bool,
    },
    OutgoingCall {
        peer: PeerId,
        media_kind: CallMediaType,
    },
    CallConnecting {
        peer: PeerId,
    },
    CallConnected {
        peer: PeerId,
    },
    CallEnded {
        peer: PeerId,
        reason: EndCallReason,
        duration_secs: Option<i64>,
    },
}

pub trait CallEventHandler: Send + Sync {
    fn handle_event(&self, event: &CallEvent);
}

/// In-process pub/sub used to fan decisions out to UI surfaces.
#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn CallEventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn CallEventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn dispatch(&self, event: &CallEvent) {
        for handler in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            handler.handle_event(event);
        }
    }
}
