//! OS wake-path adapter.
//!
//! A push can cold-start the process and show the native full-screen
//! call UI before the realtime transport knows anything. The native
//! layer forwards each delivery here as a [`WakePayload`]; the same
//! physical push routinely arrives several times, and each delivery is
//! normalized the same way, relying on the coordinator's fencing to
//! collapse the duplicates.
//!
//! Every payload describes an incoming call, so every delivery emits an
//! invite-shaped event first (the session may not exist yet on a cold
//! start), followed by the user's action if one was already taken on the
//! native UI.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::call::{CallMediaType, PeerId};
use crate::types::events::{EventKind, EventSource, RawEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeAction {
    /// The human tapped Answer on the native UI.
    Answer,
    /// The human tapped Decline on the native UI.
    Decline,
    /// The push only announced the call; no action taken yet.
    None,
}

#[derive(Debug, Clone)]
pub struct WakePayload {
    pub peer_id: PeerId,
    pub peer_name: String,
    pub media_kind: CallMediaType,
    pub action: WakeAction,
    /// When the push was originally issued, from the push envelope.
    pub issued_at: DateTime<Utc>,
}

pub struct WakeSource;

impl WakeSource {
    pub fn spawn(
        mut rx: mpsc::Receiver<WakePayload>,
        tx: mpsc::Sender<RawEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                debug!(
                    "wake delivery for {} (action {:?})",
                    payload.peer_id, payload.action
                );
                for event in Self::normalize(payload) {
                    if tx.send(event).await.is_err() {
                        warn!("coordinator queue closed; wake adapter stopping");
                        return;
                    }
                }
            }
            debug!("wake stream ended");
        })
    }

    fn normalize(payload: WakePayload) -> Vec<RawEvent> {
        let mut events = vec![
            RawEvent::new(
                EventKind::InviteReceived {
                    peer_name: payload.peer_name.clone(),
                    media_kind: payload.media_kind,
                },
                payload.peer_id.clone(),
                EventSource::Wake,
            )
            .with_source_ts(payload.issued_at),
        ];

        match payload.action {
            WakeAction::Answer => events.push(
                RawEvent::new(
                    EventKind::WakeAnswerIntent,
                    payload.peer_id,
                    EventSource::Wake,
                )
                .with_source_ts(payload.issued_at),
            ),
            WakeAction::Decline => events.push(
                RawEvent::new(EventKind::DeclineIntent, payload.peer_id, EventSource::Wake)
                    .with_source_ts(payload.issued_at),
            ),
            WakeAction::None => {}
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(action: WakeAction) -> WakePayload {
        WakePayload {
            peer_id: PeerId::from("alice"),
            peer_name: "Alice".into(),
            media_kind: CallMediaType::Audio,
            action,
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn answer_delivery_emits_invite_then_answer() {
        let events = WakeSource::normalize(payload(WakeAction::Answer));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, EventKind::InviteReceived { .. }));
        assert_eq!(events[1].kind, EventKind::WakeAnswerIntent);
        assert!(events.iter().all(|e| e.source == EventSource::Wake));
    }

    #[test]
    fn bare_delivery_emits_invite_only() {
        let events = WakeSource::normalize(payload(WakeAction::None));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, EventKind::InviteReceived { .. }));
    }

    #[test]
    fn decline_delivery_emits_invite_then_decline() {
        let events = WakeSource::normalize(payload(WakeAction::Decline));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::DeclineIntent);
    }
}
