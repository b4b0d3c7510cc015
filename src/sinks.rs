//! Collaborator contracts the coordinator emits effects to.
//!
//! The coordinator owns decisions, not I/O: every side effect crosses one
//! of these trait boundaries. Implementations live with the platform glue
//! (UI layer, socket layer, native ringer). All of them must tolerate
//! repeated calls for the same logical state; the coordinator suppresses
//! duplicate *events*, not duplicate *effects*.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::oob::OobCancelSender;
use crate::types::call::{CallId, CallMediaType, CallRole, EndCallReason, PeerId};

/// Navigation/presentation surface. Idempotent per visual state: calling
/// `present_connecting` twice must be a no-op the second time.
#[async_trait]
pub trait PresentationSink: Send + Sync {
    async fn present_outgoing(&self, peer: &PeerId, media_kind: CallMediaType)
        -> anyhow::Result<()>;
    async fn present_incoming(
        &self,
        peer: &PeerId,
        peer_name: &str,
        media_kind: CallMediaType,
    ) -> anyhow::Result<()>;
    async fn present_connecting(&self, peer: &PeerId) -> anyhow::Result<()>;
    async fn present_connected(&self, peer: &PeerId) -> anyhow::Result<()>;
    async fn dismiss(&self) -> anyhow::Result<()>;
}

/// Device ring/vibrate control. Must tolerate being started while already
/// started.
#[async_trait]
pub trait RingerSink: Send + Sync {
    async fn start_ringing(&self) -> anyhow::Result<()>;
    async fn stop_ringing(&self) -> anyhow::Result<()>;
}

/// Outbound signaling messages.
#[async_trait]
pub trait SignalSender: Send + Sync {
    async fn send_invite(
        &self,
        peer: &PeerId,
        call_id: &CallId,
        media_kind: CallMediaType,
        description: Option<&Bytes>,
    ) -> anyhow::Result<()>;

    async fn send_accept(
        &self,
        peer: &PeerId,
        call_id: &CallId,
        description: Option<&Bytes>,
    ) -> anyhow::Result<()>;

    async fn send_cancel(
        &self,
        peer: &PeerId,
        call_id: Option<&CallId>,
        reason: EndCallReason,
    ) -> anyhow::Result<()>;
}

/// The media collaborator (codec negotiation and actual audio/video pipes
/// live behind it). Its connection state changes re-enter the coordinator
/// as events; nothing here is awaited inline by the reducer.
#[async_trait]
pub trait MediaController: Send + Sync {
    async fn start_signaling(&self, role: CallRole, peer: &PeerId) -> anyhow::Result<()>;
    async fn apply_remote_description(&self, peer: &PeerId, description: Bytes)
        -> anyhow::Result<()>;
    async fn add_remote_candidate(&self, peer: &PeerId, candidate: Bytes) -> anyhow::Result<()>;
    async fn release(&self, peer: &PeerId) -> anyhow::Result<()>;
}

/// Wraps the realtime sender with the out-of-band cancel fallback.
///
/// A cancel must be attempted even when the realtime channel is down; the
/// peer otherwise keeps ringing until its own timeout. Accept/invite have
/// no fallback: without a live channel the call cannot proceed anyway.
pub struct FallbackSignalSender {
    realtime: Arc<dyn SignalSender>,
    oob: Option<Arc<OobCancelSender>>,
}

impl FallbackSignalSender {
    pub fn new(realtime: Arc<dyn SignalSender>, oob: Option<Arc<OobCancelSender>>) -> Self {
        Self { realtime, oob }
    }

    /// Build from config; the fallback is active only when an endpoint is
    /// configured.
    pub fn from_config(realtime: Arc<dyn SignalSender>, config: &CoordinatorConfig) -> Self {
        let oob = config
            .oob_endpoint
            .as_ref()
            .map(|endpoint| OobCancelSender::new(endpoint.clone(), config.oob_max_attempts));
        Self { realtime, oob }
    }
}

#[async_trait]
impl SignalSender for FallbackSignalSender {
    async fn send_invite(
        &self,
        peer: &PeerId,
        call_id: &CallId,
        media_kind: CallMediaType,
        description: Option<&Bytes>,
    ) -> anyhow::Result<()> {
        self.realtime
            .send_invite(peer, call_id, media_kind, description)
            .await
    }

    async fn send_accept(
        &self,
        peer: &PeerId,
        call_id: &CallId,
        description: Option<&Bytes>,
    ) -> anyhow::Result<()> {
        self.realtime.send_accept(peer, call_id, description).await
    }

    async fn send_cancel(
        &self,
        peer: &PeerId,
        call_id: Option<&CallId>,
        reason: EndCallReason,
    ) -> anyhow::Result<()> {
        match self.realtime.send_cancel(peer, call_id, reason).await {
            Ok(()) => Ok(()),
            Err(e) => match &self.oob {
                Some(oob) => {
                    warn!(
                        "realtime cancel to {peer} failed ({e}); queueing out-of-band delivery"
                    );
                    oob.enqueue(peer.clone(), call_id.cloned(), reason);
                    Ok(())
                }
                None => {
                    debug!("realtime cancel to {peer} failed and no fallback is configured");
                    Err(e)
                }
            },
        }
    }
}
