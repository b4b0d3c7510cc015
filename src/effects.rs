//! Side-effect intents and their dispatcher.
//!
//! The coordinator's reducer never performs I/O: it emits [`Effect`]s,
//! and this dispatcher task carries them to the sinks. Sink failures are
//! retried here with bounded attempts; the coordinator never retries a
//! state transition.

use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::handoff::{HandoffRecord, HandoffStore};
use crate::sinks::{MediaController, PresentationSink, RingerSink, SignalSender};
use crate::types::call::{
    CallFingerprint, CallId, CallMediaType, CallRole, EndCallReason, PeerId,
};
use bytes::Bytes;

const MAX_SINK_ATTEMPTS: u32 = 3;
const SINK_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Cancellation token for one fingerprint's in-flight effects.
///
/// Tripped on terminal transition. The dispatcher checks it immediately
/// before invoking a sink, so an effect that was queued before the
/// cancel but runs after it gets dropped instead of resurrecting UI for
/// a finished call.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum Effect {
    PresentOutgoing {
        peer: PeerId,
        media_kind: CallMediaType,
    },
    PresentIncoming {
        peer: PeerId,
        peer_name: String,
        media_kind: CallMediaType,
    },
    PresentConnecting {
        peer: PeerId,
    },
    PresentConnected {
        peer: PeerId,
    },
    Dismiss,
    StartRinging,
    StopRinging,
    SendInvite {
        peer: PeerId,
        call_id: CallId,
        media_kind: CallMediaType,
        description: Option<Bytes>,
    },
    SendAccept {
        peer: PeerId,
        call_id: CallId,
        description: Option<Bytes>,
    },
    SendCancel {
        peer: PeerId,
        call_id: Option<CallId>,
        reason: EndCallReason,
    },
    StartMedia {
        role: CallRole,
        peer: PeerId,
    },
    ApplyRemoteDescription {
        peer: PeerId,
        description: Bytes,
    },
    AddRemoteCandidate {
        peer: PeerId,
        candidate: Bytes,
    },
    ReleaseMedia {
        peer: PeerId,
    },
    StoreHandoff {
        record: HandoffRecord,
    },
    ClearHandoff {
        peer: PeerId,
    },
}

impl Effect {
    /// Teardown effects run even after the fingerprint's cancel flag has
    /// tripped; everything else is dropped.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            Effect::Dismiss
                | Effect::StopRinging
                | Effect::SendCancel { .. }
                | Effect::ReleaseMedia { .. }
                | Effect::ClearHandoff { .. }
        )
    }
}

pub struct EffectEnvelope {
    pub fingerprint: CallFingerprint,
    pub cancel: CancelFlag,
    pub effect: Effect,
}

/// The collaborator bundle the dispatcher drives.
#[derive(Clone)]
pub struct Sinks {
    pub presentation: Arc<dyn PresentationSink>,
    pub ringer: Arc<dyn RingerSink>,
    pub signals: Arc<dyn SignalSender>,
    pub media: Arc<dyn MediaController>,
    pub handoff: Arc<dyn HandoffStore>,
}

pub struct EffectDispatcher {
    rx: mpsc::UnboundedReceiver<EffectEnvelope>,
    sinks: Sinks,
}

impl EffectDispatcher {
    pub fn new(rx: mpsc::UnboundedReceiver<EffectEnvelope>, sinks: Sinks) -> Self {
        Self { rx, sinks }
    }

    /// Drain effects until the coordinator drops its sender.
    pub async fn run(mut self) {
        while let Some(envelope) = self.rx.recv().await {
            if envelope.cancel.is_tripped() && !envelope.effect.is_teardown() {
                debug!(
                    "dropping effect {:?} for finalized {}",
                    envelope.effect, envelope.fingerprint
                );
                continue;
            }

            for attempt in 1..=MAX_SINK_ATTEMPTS {
                match self.apply(&envelope.effect).await {
                    Ok(()) => break,
                    Err(e) if attempt < MAX_SINK_ATTEMPTS => {
                        warn!(
                            "effect {:?} failed (attempt {attempt}/{MAX_SINK_ATTEMPTS}): {e}",
                            envelope.effect
                        );
                        tokio::time::sleep(SINK_RETRY_DELAY).await;
                    }
                    Err(e) => {
                        warn!("effect {:?} abandoned: {e}", envelope.effect);
                    }
                }
            }
        }
        debug!("effect dispatcher stopped");
    }

    async fn apply(&self, effect: &Effect) -> anyhow::Result<()> {
        match effect {
            Effect::PresentOutgoing { peer, media_kind } => {
                self.sinks.presentation.present_outgoing(peer, *media_kind).await
            }
            Effect::PresentIncoming {
                peer,
                peer_name,
                media_kind,
            } => {
                self.sinks
                    .presentation
                    .present_incoming(peer, peer_name, *media_kind)
                    .await
            }
            Effect::PresentConnecting { peer } => {
                self.sinks.presentation.present_connecting(peer).await
            }
            Effect::PresentConnected { peer } => {
                self.sinks.presentation.present_connected(peer).await
            }
            Effect::Dismiss => self.sinks.presentation.dismiss().await,
            Effect::StartRinging => self.sinks.ringer.start_ringing().await,
            Effect::StopRinging => self.sinks.ringer.stop_ringing().await,
            Effect::SendInvite {
                peer,
                call_id,
                media_kind,
                description,
            } => {
                self.sinks
                    .signals
                    .send_invite(peer, call_id, *media_kind, description.as_ref())
                    .await
            }
            Effect::SendAccept {
                peer,
                call_id,
                description,
            } => {
                self.sinks
                    .signals
                    .send_accept(peer, call_id, description.as_ref())
                    .await
            }
            Effect::SendCancel {
                peer,
                call_id,
                reason,
            } => {
                self.sinks
                    .signals
                    .send_cancel(peer, call_id.as_ref(), *reason)
                    .await
            }
            Effect::StartMedia { role, peer } => {
                self.sinks.media.start_signaling(*role, peer).await
            }
            Effect::ApplyRemoteDescription { peer, description } => {
                self.sinks
                    .media
                    .apply_remote_description(peer, description.clone())
                    .await
            }
            Effect::AddRemoteCandidate { peer, candidate } => {
                self.sinks
                    .media
                    .add_remote_candidate(peer, candidate.clone())
                    .await
            }
            Effect::ReleaseMedia { peer } => self.sinks.media.release(peer).await,
            Effect::StoreHandoff { record } => {
                self.sinks.handoff.put(record.clone()).await?;
                Ok(())
            }
            Effect::ClearHandoff { peer } => {
                self.sinks.handoff.clear(peer).await?;
                Ok(())
            }
        }
    }
}
