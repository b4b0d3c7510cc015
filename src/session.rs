//! Call session state machine.

use bytes::Bytes;
use serde::Serialize;
use std::time::Instant;

use crate::types::call::{
    CallDirection, CallFingerprint, CallId, CallMediaType, CallRole, EndCallReason, PeerId,
};

/// Phase of a call attempt.
///
/// Phases only move forward along the lifecycle; the single allowed
/// re-entry is `Answering` collapsing back to `IncomingRinging` when an
/// answer intent was observed before any signaling payload arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CallPhase {
    /// Freshly minted, no transition applied yet.
    #[default]
    Idle,
    /// We sent an invite and are waiting for the peer.
    OutgoingRinging,
    /// The peer invited us and we are ringing locally.
    IncomingRinging,
    /// Answer is in flight (accept sent, or waiting for the signal
    /// payload on the wake path).
    Answering,
    /// Both sides agreed; media is being established.
    Connecting,
    /// Media is up.
    Connected,
    /// Terminal: the call was live and ended.
    Ended,
    /// Terminal: the attempt stopped before connecting.
    Canceled,
}

impl CallPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallPhase::Ended | CallPhase::Canceled)
    }

    pub fn is_ringing(self) -> bool {
        matches!(self, CallPhase::OutgoingRinging | CallPhase::IncomingRinging)
    }
}

/// State transitions applied by the coordinator.
#[derive(Debug, Clone)]
pub enum CallTransition {
    /// Local outbound intent accepted; the invite is going out.
    OutboundStarted,
    /// An inbound invite landed for a fresh session.
    InviteAccepted,
    /// Answer begins (signal payload present, accept going out).
    AnswerStarted,
    /// Answer intent observed but no signal payload yet; fall back to
    /// ringing and wait. Retains `answered_via_wake`.
    AnswerDeferred,
    /// The transport acknowledged our accept.
    AcceptConfirmed,
    /// The remote side accepted our outgoing call.
    RemoteAccepted,
    /// Media reported connected.
    MediaConnected,
    /// The attempt is over, one way or another.
    Terminated { reason: EndCallReason },
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub phase: CallPhase,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in phase {:?}",
            self.attempted, self.phase
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// One logical call attempt. Owned exclusively by the session store and
/// mutated only through coordinator transitions.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub fingerprint: CallFingerprint,
    /// Adopted from the first transport message that carries one.
    pub call_id: Option<CallId>,
    pub phase: CallPhase,
    pub peer_name: String,
    pub media_kind: CallMediaType,
    /// Set the instant a local cancel intent is observed, before any
    /// transport confirmation. Blocks all further progress effects.
    pub pending_cancel: bool,
    /// Same, for a decline of an incoming call.
    pub pending_decline: bool,
    /// Remote description, once received. Required before an accept can
    /// actually be sent.
    pub signal_payload: Option<Bytes>,
    /// Sticky once true; only session termination clears it. Resetting it
    /// mid-flight would drop answer progress made on the wake path.
    pub answered_via_wake: bool,
    /// Ticks consumed while waiting for a wake-path signal payload.
    pub wake_wait_attempts: u32,
    /// True once the media collaborator has been started for this attempt.
    pub media_started: bool,
    /// True once a cancel/hangup went out on the transport for this
    /// attempt; terminal handling must not send a second one.
    pub cancel_sent: bool,
    pub created_at: Instant,
    pub last_transition_at: Instant,
    pub connected_at: Option<Instant>,
    /// Reason recorded when the terminal transition was applied.
    pub end_reason: Option<EndCallReason>,
}

impl CallSession {
    pub fn new_outgoing(peer: PeerId, media_kind: CallMediaType) -> Self {
        Self::new(CallFingerprint::outgoing(peer), media_kind)
    }

    pub fn new_incoming(peer: PeerId, peer_name: String, media_kind: CallMediaType) -> Self {
        let mut session = Self::new(CallFingerprint::incoming(peer), media_kind);
        session.peer_name = peer_name;
        session
    }

    fn new(fingerprint: CallFingerprint, media_kind: CallMediaType) -> Self {
        let now = Instant::now();
        Self {
            fingerprint,
            call_id: None,
            phase: CallPhase::Idle,
            peer_name: String::new(),
            media_kind,
            pending_cancel: false,
            pending_decline: false,
            signal_payload: None,
            answered_via_wake: false,
            wake_wait_attempts: 0,
            media_started: false,
            cancel_sent: false,
            created_at: now,
            last_transition_at: now,
            connected_at: None,
            end_reason: None,
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.fingerprint.peer
    }

    pub fn direction(&self) -> CallDirection {
        self.fingerprint.direction
    }

    pub fn role(&self) -> CallRole {
        self.fingerprint.direction.role()
    }

    /// True once a decline/cancel intent has been observed; progress
    /// effects must not be emitted past this point.
    pub fn is_guarded(&self) -> bool {
        self.pending_cancel || self.pending_decline
    }

    /// Adopt a call id from the transport. A session never trades one
    /// adopted id for another.
    pub fn adopt_call_id(&mut self, call_id: &CallId) -> bool {
        match &self.call_id {
            Some(existing) => existing == call_id,
            None => {
                self.call_id = Some(call_id.clone());
                true
            }
        }
    }

    /// Seconds of talk time, once connected.
    pub fn duration_secs(&self) -> Option<i64> {
        self.connected_at
            .map(|at| at.elapsed().as_secs() as i64)
    }

    /// Apply a state transition. Returns an error if the transition is not
    /// valid from the current phase.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<(), InvalidTransition> {
        let new_phase = match (self.phase, &transition) {
            (CallPhase::Idle, CallTransition::OutboundStarted) => CallPhase::OutgoingRinging,
            (CallPhase::Idle, CallTransition::InviteAccepted) => CallPhase::IncomingRinging,
            (CallPhase::IncomingRinging, CallTransition::AnswerStarted) => CallPhase::Answering,
            (CallPhase::Answering, CallTransition::AnswerDeferred) => CallPhase::IncomingRinging,
            (CallPhase::Answering, CallTransition::AcceptConfirmed) => CallPhase::Connecting,
            (CallPhase::OutgoingRinging, CallTransition::RemoteAccepted) => CallPhase::Connecting,
            (CallPhase::Connecting, CallTransition::MediaConnected) => CallPhase::Connected,
            (CallPhase::Connected, CallTransition::Terminated { reason }) => {
                self.end_reason = Some(*reason);
                CallPhase::Ended
            }
            (
                CallPhase::Idle
                | CallPhase::OutgoingRinging
                | CallPhase::IncomingRinging
                | CallPhase::Answering
                | CallPhase::Connecting,
                CallTransition::Terminated { reason },
            ) => {
                self.end_reason = Some(*reason);
                CallPhase::Canceled
            }
            (phase, transition) => {
                return Err(InvalidTransition {
                    phase,
                    attempted: format!("{transition:?}"),
                });
            }
        };

        if new_phase == CallPhase::Connected {
            self.connected_at = Some(Instant::now());
        }
        self.phase = new_phase;
        self.last_transition_at = Instant::now();
        Ok(())
    }
}
