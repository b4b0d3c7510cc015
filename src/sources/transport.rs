//! Signaling-transport adapter.
//!
//! The realtime socket lives outside this crate; whatever reads it hands
//! framed [`SignalMessage`]s to this adapter, which normalizes them into
//! coordinator events. `sent_at` is the emission timestamp from the wire
//! envelope, not the local receive time: re-deliveries keep the original
//! timestamp, which is what fencing keys on.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::call::{CallId, CallMediaType, PeerId};
use crate::types::events::{BusyReason, EventKind, EventSource, RawEvent};

#[derive(Debug, Clone)]
pub enum SignalBody {
    Invite {
        peer: PeerId,
        call_id: Option<CallId>,
        peer_name: String,
        media_kind: CallMediaType,
        description: Option<Bytes>,
    },
    Accept {
        peer: PeerId,
        call_id: CallId,
        description: Bytes,
    },
    IceCandidate {
        peer: PeerId,
        call_id: CallId,
        candidate: Bytes,
    },
    Cancel {
        peer: PeerId,
        call_id: Option<CallId>,
    },
    Busy {
        peer: PeerId,
        reason: BusyReason,
    },
    /// Transport-level acknowledgment of our outbound accept.
    Ack {
        peer: PeerId,
        call_id: CallId,
    },
}

#[derive(Debug, Clone)]
pub struct SignalMessage {
    pub body: SignalBody,
    pub sent_at: DateTime<Utc>,
}

impl SignalMessage {
    pub fn new(body: SignalBody) -> Self {
        Self {
            body,
            sent_at: Utc::now(),
        }
    }
}

pub struct TransportSource;

impl TransportSource {
    pub fn spawn(
        mut rx: mpsc::Receiver<SignalMessage>,
        tx: mpsc::Sender<RawEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let event = Self::normalize(message);
                debug!(
                    "transport event {:?} for {} enqueued",
                    event.kind, event.peer
                );
                if tx.send(event).await.is_err() {
                    warn!("coordinator queue closed; transport adapter stopping");
                    return;
                }
            }
            debug!("transport stream ended");
        })
    }

    fn normalize(message: SignalMessage) -> RawEvent {
        let sent_at = message.sent_at;
        let event = match message.body {
            SignalBody::Invite {
                peer,
                call_id,
                peer_name,
                media_kind,
                description,
            } => {
                let mut event = RawEvent::new(
                    EventKind::InviteReceived {
                        peer_name,
                        media_kind,
                    },
                    peer,
                    EventSource::Transport,
                );
                if let Some(call_id) = call_id {
                    event = event.with_call_id(call_id);
                }
                if let Some(description) = description {
                    event = event.with_payload(description);
                }
                event
            }
            SignalBody::Accept {
                peer,
                call_id,
                description,
            } => RawEvent::new(EventKind::RemoteSignal, peer, EventSource::Transport)
                .with_call_id(call_id)
                .with_payload(description),
            SignalBody::IceCandidate {
                peer,
                call_id,
                candidate,
            } => RawEvent::new(EventKind::RemoteCandidate, peer, EventSource::Transport)
                .with_call_id(call_id)
                .with_payload(candidate),
            SignalBody::Cancel { peer, call_id } => {
                let mut event =
                    RawEvent::new(EventKind::CancelIntent, peer, EventSource::Transport);
                if let Some(call_id) = call_id {
                    event = event.with_call_id(call_id);
                }
                event
            }
            SignalBody::Busy { peer, reason } => RawEvent::new(
                EventKind::BusyOrOffline(reason),
                peer,
                EventSource::Transport,
            ),
            SignalBody::Ack { peer, call_id } => {
                RawEvent::new(EventKind::TransportAck, peer, EventSource::Transport)
                    .with_call_id(call_id)
            }
        };
        event.with_source_ts(sent_at)
    }
}
