//! Out-of-band cancel delivery.
//!
//! When the realtime channel is down, a cancel is handed to this
//! store-and-forward queue and delivered over plain HTTP with bounded
//! retries. At most one cancel is queued per peer; a call attempt only
//! ever needs one, and the peer's own fencing absorbs the case where the
//! realtime send eventually lands too.

use dashmap::DashMap;
use log::{debug, warn};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::types::call::{CallId, EndCallReason, PeerId};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize)]
struct CancelRequest<'a> {
    peer_id: &'a str,
    call_id: Option<&'a str>,
    reason: EndCallReason,
}

pub struct OobCancelSender {
    endpoint: String,
    max_attempts: u32,
    /// Peers with a delivery currently in flight.
    pending: DashMap<PeerId, ()>,
}

impl OobCancelSender {
    pub fn new(endpoint: impl Into<String>, max_attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            max_attempts: max_attempts.max(1),
            pending: DashMap::new(),
        })
    }

    /// Queue a cancel for delivery. A second enqueue for the same peer
    /// while one is in flight is dropped.
    pub fn enqueue(self: &Arc<Self>, peer: PeerId, call_id: Option<CallId>, reason: EndCallReason) {
        if self.pending.insert(peer.clone(), ()).is_some() {
            debug!("out-of-band cancel for {peer} already queued");
            return;
        }

        let sender = self.clone();
        tokio::spawn(async move {
            let _guard = scopeguard::guard((sender.clone(), peer.clone()), |(sender, peer)| {
                sender.pending.remove(&peer);
            });
            sender.deliver(&peer, call_id.as_ref(), reason).await;
        });
    }

    pub fn has_pending(&self, peer: &PeerId) -> bool {
        self.pending.contains_key(peer)
    }

    async fn deliver(&self, peer: &PeerId, call_id: Option<&CallId>, reason: EndCallReason) {
        let body = match serde_json::to_string(&CancelRequest {
            peer_id: peer.as_str(),
            call_id: call_id.map(CallId::as_str),
            reason,
        }) {
            Ok(body) => body,
            Err(e) => {
                warn!(target: "Coordinator/Oob", "failed to encode cancel for {peer}: {e}");
                return;
            }
        };

        for attempt in 1..=self.max_attempts {
            let endpoint = self.endpoint.clone();
            let payload = body.clone();

            let result = tokio::task::spawn_blocking(move || {
                ureq::post(&endpoint)
                    .header("content-type", "application/json")
                    .send(payload.as_str())
            })
            .await;

            match result {
                Ok(Ok(_)) => {
                    debug!(target: "Coordinator/Oob", "out-of-band cancel for {peer} delivered");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "Coordinator/Oob",
                        "out-of-band cancel for {peer} failed (attempt {attempt}/{}): {e}",
                        self.max_attempts
                    );
                }
                Err(e) => {
                    warn!(target: "Coordinator/Oob", "cancel delivery task failed: {e}");
                    return;
                }
            }

            if attempt < self.max_attempts {
                let jitter = rand::rng().random_range(0..250);
                tokio::time::sleep(RETRY_BASE_DELAY + Duration::from_millis(jitter)).await;
            }
        }

        // The peer will independently time out its ring; nothing more we
        // can do from this side.
        warn!(target: "Coordinator/Oob", "giving up on out-of-band cancel for {peer}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_enqueue_for_same_peer_is_dropped() {
        // Unroutable endpoint: delivery fails, which is fine; we only
        // care about the pending-set behavior here.
        let sender = OobCancelSender::new("http://127.0.0.1:9/cancel", 1);
        let alice = PeerId::from("alice");

        sender.enqueue(alice.clone(), None, EndCallReason::Declined);
        assert!(sender.has_pending(&alice));
        sender.enqueue(alice.clone(), None, EndCallReason::Declined);

        // Wait for the in-flight delivery to give up and clear the marker.
        for _ in 0..100 {
            if !sender.has_pending(&alice) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!sender.has_pending(&alice));
    }
}
