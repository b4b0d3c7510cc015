//! Call coordination error types.

use thiserror::Error;

use crate::handoff::HandoffError;
use crate::session::InvalidTransition;
use crate::types::call::PeerId;

#[derive(Debug, Error)]
pub enum CallError {
    /// The event duplicates an already-finalized attempt. Dropped, never
    /// surfaced past a debug log.
    #[error("duplicate event for a finalized call attempt")]
    DuplicateEvent,

    /// The event refers to a fingerprint that is no longer (or not yet)
    /// live.
    #[error("stale event: {0}")]
    StaleEvent(String),

    #[error("no live call with {0}")]
    NoSession(PeerId),

    #[error("call already in progress with {0}")]
    AlreadyInCall(PeerId),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    /// The wake path answered but the signaling payload never arrived.
    #[error("timed out waiting for the signaling payload")]
    SignalTimeout,

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("handoff store error: {0}")]
    Handoff(#[from] HandoffError),

    /// The coordinator worker is gone.
    #[error("coordinator is shut down")]
    Closed,
}
